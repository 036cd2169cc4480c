//! Decides which knowledge base a batch targets, from the user's mode and the
//! backend's listing for the active collection.

use crate::CoreError;
use crate::kb::{KB_ID_DELIMITER, KbMode, KbTarget, KnowledgeBaseRef, display_name_of};

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBaseResolver {
    collection: Option<String>,
    mode: KbMode,
    /// Server ids listed for `collection`, in listing order, deduplicated.
    listing: Vec<String>,
    listing_error: Option<String>,
    selected: Option<String>,
    typed_name: String,
    /// Existing server id whose display name equals `typed_name`.
    matched: Option<String>,
}

impl KnowledgeBaseResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn mode(&self) -> KbMode {
        self.mode
    }

    pub fn listing(&self) -> &[String] {
        &self.listing
    }

    pub fn knowledge_bases(&self) -> Vec<KnowledgeBaseRef> {
        self.listing
            .iter()
            .map(KnowledgeBaseRef::from_server_id)
            .collect()
    }

    /// Message from the last failed listing, if the listing is degraded.
    pub fn listing_error(&self) -> Option<&str> {
        self.listing_error.as_deref()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn typed_name(&self) -> &str {
        &self.typed_name
    }

    pub fn matched(&self) -> Option<&str> {
        self.matched.as_deref()
    }

    /// Switch the active collection. Anything derived from the previous
    /// collection's listing is dropped; the typed name survives and is
    /// re-probed once the new listing arrives.
    pub fn set_collection(&mut self, collection: Option<String>) {
        if self.collection == collection {
            return;
        }
        self.collection = collection;
        self.listing.clear();
        self.listing_error = None;
        self.selected = None;
        self.matched = None;
    }

    /// Install the outcome of a list-knowledge-bases call.
    ///
    /// On failure the last good listing and the selection are kept and the
    /// error flag is set. With no earlier listing this leaves select mode
    /// with nothing to pick while create mode keeps working.
    pub fn apply_listing(&mut self, listing: Result<Vec<String>, CoreError>) {
        match listing {
            Ok(ids) => {
                let mut unique: Vec<String> = Vec::with_capacity(ids.len());
                for id in ids {
                    if !unique.contains(&id) {
                        unique.push(id);
                    }
                }
                self.listing = unique;
                self.listing_error = None;
                self.selected = match self.selected.take() {
                    Some(prev) if self.listing.contains(&prev) => Some(prev),
                    _ => self.listing.first().cloned(),
                };
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    cached = self.listing.len(),
                    "knowledge base listing failed"
                );
                self.listing_error = Some(e.to_string());
            }
        }
        self.probe();
    }

    pub fn set_mode(&mut self, mode: KbMode) {
        self.mode = mode;
    }

    /// Pick an existing knowledge base by server id.
    pub fn select(&mut self, server_id: &str) -> Result<(), CoreError> {
        if !self.listing.iter().any(|id| id == server_id) {
            return Err(CoreError::Validation(format!(
                "knowledge base '{server_id}' is not listed in this collection"
            )));
        }
        self.selected = Some(server_id.to_string());
        Ok(())
    }

    /// Record the create-mode name and re-probe for a collision against the
    /// cached listing.
    pub fn set_typed_name(&mut self, raw: &str) {
        self.typed_name = raw.trim().to_string();
        self.probe();
    }

    /// Compare the typed name against each listed id's display name.
    fn probe(&mut self) {
        let previous = self.matched.take();
        if self.typed_name.is_empty() {
            return;
        }
        self.matched = self
            .listing
            .iter()
            .find(|id| id.contains(KB_ID_DELIMITER) && display_name_of(id) == self.typed_name)
            .cloned();
        if self.matched != previous
            && let Some(id) = &self.matched
        {
            tracing::debug!(
                name = %self.typed_name,
                server_id = %id,
                "typed name matches an existing knowledge base"
            );
        }
    }

    /// Fix the batch target for the current mode.
    pub fn resolve(&self) -> Result<KbTarget, CoreError> {
        match self.mode {
            KbMode::SelectExisting => {
                let server_id = self.selected.clone().ok_or_else(|| {
                    CoreError::Validation(if self.listing.is_empty() {
                        "no knowledge base available in this collection; create a new one"
                            .to_string()
                    } else {
                        "select a knowledge base".to_string()
                    })
                })?;
                // The server resolves uploads by `{name}_` prefix, so an id
                // without a suffix cannot be addressed.
                if !server_id.contains(KB_ID_DELIMITER) {
                    return Err(CoreError::Validation(format!(
                        "knowledge base '{server_id}' has no server suffix"
                    )));
                }
                if display_name_of(&server_id).is_empty() {
                    return Err(CoreError::Validation(format!(
                        "knowledge base '{server_id}' has an empty name"
                    )));
                }
                Ok(KbTarget::Select { server_id })
            }
            KbMode::CreateNew => {
                if self.typed_name.is_empty() {
                    return Err(CoreError::Validation(
                        "enter a name for the new knowledge base".to_string(),
                    ));
                }
                let name = self.typed_name.clone();
                Ok(match &self.matched {
                    Some(matched_id) => KbTarget::CreateNewMatched {
                        name,
                        matched_id: matched_id.clone(),
                    },
                    None => KbTarget::CreateNew { name },
                })
            }
        }
    }

    /// Server id whose documents should be shown right now, if any.
    pub fn documents_target(&self) -> Option<&str> {
        match self.mode {
            KbMode::SelectExisting => self.selected.as_deref(),
            KbMode::CreateNew => self.matched.as_deref(),
        }
    }

    /// After a create-mode batch minted `server_id`, point the resolver at it
    /// in select mode.
    pub fn adopt_created(&mut self, server_id: &str) {
        if !self.listing.iter().any(|id| id == server_id) {
            self.listing.push(server_id.to_string());
        }
        self.mode = KbMode::SelectExisting;
        self.selected = Some(server_id.to_string());
        self.matched = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(ids: &[&str]) -> KnowledgeBaseResolver {
        let mut r = KnowledgeBaseResolver::new();
        r.set_collection(Some("docs".into()));
        r.apply_listing(Ok(ids.iter().map(|s| s.to_string()).collect()));
        r
    }

    #[test]
    fn listing_selects_first_by_default() {
        let r = listed(&["manuals_17", "hr_2a"]);
        assert_eq!(r.selected(), Some("manuals_17"));
        assert_eq!(
            r.resolve().unwrap(),
            KbTarget::Select {
                server_id: "manuals_17".into()
            }
        );
        assert_eq!(r.documents_target(), Some("manuals_17"));
    }

    #[test]
    fn listing_is_deduplicated() {
        let r = listed(&["a_1", "b_2", "a_1"]);
        assert_eq!(r.listing(), &["a_1".to_string(), "b_2".to_string()]);
        let names: Vec<_> = r.knowledge_bases().into_iter().map(|k| k.display_name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn relisting_keeps_a_still_present_selection() {
        let mut r = listed(&["a_1", "b_2"]);
        r.select("b_2").unwrap();
        r.apply_listing(Ok(vec!["c_3".into(), "b_2".into()]));
        assert_eq!(r.selected(), Some("b_2"));

        r.apply_listing(Ok(vec!["c_3".into()]));
        assert_eq!(r.selected(), Some("c_3"));
    }

    #[test]
    fn select_rejects_unlisted_id() {
        let mut r = listed(&["a_1"]);
        assert!(matches!(r.select("zzz_9"), Err(CoreError::Validation(_))));
        assert_eq!(r.selected(), Some("a_1"));
    }

    #[test]
    fn failed_listing_blocks_select_but_not_create() {
        let mut r = KnowledgeBaseResolver::new();
        r.set_collection(Some("docs".into()));
        r.apply_listing(Err(CoreError::Transport("connection refused".into())));

        assert!(r.listing().is_empty());
        assert_eq!(r.listing_error(), Some("connection refused"));
        assert!(matches!(r.resolve(), Err(CoreError::Validation(_))));

        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("fresh");
        assert_eq!(
            r.resolve().unwrap(),
            KbTarget::CreateNew {
                name: "fresh".into()
            }
        );
    }

    #[test]
    fn failed_relisting_keeps_last_good_listing_and_selection() {
        let mut r = listed(&["a_1", "b_2"]);
        r.select("b_2").unwrap();
        r.apply_listing(Err(CoreError::Transport("HTTP 502".into())));

        assert_eq!(r.listing(), &["a_1".to_string(), "b_2".to_string()]);
        assert_eq!(r.selected(), Some("b_2"));
        assert_eq!(r.listing_error(), Some("HTTP 502"));
        assert_eq!(
            r.resolve().unwrap(),
            KbTarget::Select {
                server_id: "b_2".into()
            }
        );
    }

    #[test]
    fn failed_relisting_keeps_adopted_knowledge_base() {
        let mut r = listed(&["a_1"]);
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("contracts");
        r.adopt_created("contracts_a0000001");
        r.apply_listing(Err(CoreError::Transport("HTTP 500".into())));

        assert_eq!(r.mode(), KbMode::SelectExisting);
        assert_eq!(r.selected(), Some("contracts_a0000001"));
        assert_eq!(r.documents_target(), Some("contracts_a0000001"));
    }

    #[test]
    fn successful_listing_clears_error_flag() {
        let mut r = listed(&[]);
        r.apply_listing(Err(CoreError::Transport("down".into())));
        r.apply_listing(Ok(vec!["a_1".into()]));
        assert_eq!(r.listing_error(), None);
        assert_eq!(r.selected(), Some("a_1"));
    }

    #[test]
    fn typed_name_matching_existing_kb_upgrades_target() {
        let mut r = listed(&["manuals_17"]);
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("manuals");

        assert_eq!(r.mode(), KbMode::CreateNew);
        assert_eq!(r.matched(), Some("manuals_17"));
        assert_eq!(r.documents_target(), Some("manuals_17"));
        assert_eq!(
            r.resolve().unwrap(),
            KbTarget::CreateNewMatched {
                name: "manuals".into(),
                matched_id: "manuals_17".into(),
            }
        );
    }

    #[test]
    fn probe_compares_full_display_name() {
        let mut r = listed(&["team_a_9f", "team_1"]);
        r.set_mode(KbMode::CreateNew);

        r.set_typed_name("team");
        assert_eq!(r.matched(), Some("team_1"));

        r.set_typed_name("team_a");
        assert_eq!(r.matched(), Some("team_a_9f"));

        r.set_typed_name("tea");
        assert_eq!(r.matched(), None);
        assert_eq!(r.documents_target(), None);
    }

    #[test]
    fn typed_name_is_trimmed_and_blank_is_rejected() {
        let mut r = listed(&["manuals_17"]);
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("  manuals \n");
        assert_eq!(r.typed_name(), "manuals");
        assert_eq!(r.matched(), Some("manuals_17"));

        r.set_typed_name("   ");
        assert_eq!(r.matched(), None);
        assert!(matches!(r.resolve(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn listing_arrival_reprobes_typed_name() {
        let mut r = KnowledgeBaseResolver::new();
        r.set_collection(Some("docs".into()));
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("manuals");
        assert_eq!(r.matched(), None);

        r.apply_listing(Ok(vec!["manuals_17".into()]));
        assert_eq!(r.matched(), Some("manuals_17"));
    }

    #[test]
    fn changing_collection_invalidates_resolution() {
        let mut r = listed(&["manuals_17"]);
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("manuals");
        assert!(r.matched().is_some());

        r.set_collection(Some("other".into()));
        assert_eq!(r.collection(), Some("other"));
        assert!(r.listing().is_empty());
        assert_eq!(r.selected(), None);
        assert_eq!(r.matched(), None);
        assert_eq!(r.typed_name(), "manuals");
        assert_eq!(
            r.resolve().unwrap(),
            KbTarget::CreateNew {
                name: "manuals".into()
            }
        );
    }

    #[test]
    fn same_collection_is_a_no_op() {
        let mut r = listed(&["a_1"]);
        r.set_collection(Some("docs".into()));
        assert_eq!(r.selected(), Some("a_1"));
    }

    #[test]
    fn select_mode_with_empty_listing_fails_validation() {
        let r = listed(&[]);
        let err = r.resolve().unwrap_err();
        assert!(err.to_string().contains("no knowledge base available"));
    }

    #[test]
    fn select_mode_with_empty_display_name_fails_validation() {
        let r = listed(&["_abc"]);
        assert!(matches!(r.resolve(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn select_mode_rejects_id_without_server_suffix() {
        let r = listed(&["standalone"]);
        assert_eq!(r.selected(), Some("standalone"));
        assert!(matches!(r.resolve(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn typed_name_ignores_ids_without_server_suffix() {
        let mut r = listed(&["standalone"]);
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("standalone");
        assert_eq!(r.matched(), None);
        assert_eq!(
            r.resolve().unwrap(),
            KbTarget::CreateNew {
                name: "standalone".into()
            }
        );
    }

    #[test]
    fn adopt_created_switches_to_select() {
        let mut r = listed(&["hr_2a"]);
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("contracts");
        r.adopt_created("contracts_0badf00d");

        assert_eq!(r.mode(), KbMode::SelectExisting);
        assert_eq!(r.selected(), Some("contracts_0badf00d"));
        assert!(r.listing().contains(&"contracts_0badf00d".to_string()));
        assert_eq!(r.documents_target(), Some("contracts_0badf00d"));

        r.adopt_created("contracts_0badf00d");
        assert_eq!(r.listing().len(), 2);
    }

    #[test]
    fn mode_switch_keeps_both_sides() {
        let mut r = listed(&["a_1", "b_2"]);
        r.select("b_2").unwrap();
        r.set_mode(KbMode::CreateNew);
        r.set_typed_name("a");
        assert_eq!(r.documents_target(), Some("a_1"));

        r.set_mode(KbMode::SelectExisting);
        assert_eq!(r.documents_target(), Some("b_2"));
    }
}
