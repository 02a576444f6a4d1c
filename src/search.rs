//! Live search merged with the user's selection.
//!
//! A [`SearchCoordinator`] drives one search box: it issues queries against a
//! [`SearchSource`], keeps the latest result set, and merges it with a
//! [`SelectionStore`] into the list the host view renders.
//!
//! # Ordering rules
//!
//! - Queries shorter than `min_query_chars` never hit the network; they clear
//!   the result set.
//! - Last query wins: every `set_query` bumps a generation counter, and a
//!   response is applied only if its generation is still current when it
//!   arrives. A slow response for an older query is dropped even if it lands
//!   after the newer one.
//! - The result set is replaced wholesale by each applied response.
//!
//! # Display list
//!
//! All current search hits (`from_search = true`), then every selected item
//! whose display name does not already appear among the hits
//! (`from_search = false`). The whole list is sorted with search hits first,
//! then by display name ascending.
//!
//! State changes are published as [`SearchSnapshot`]s on a `watch` channel.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::error::ApiResult;
use crate::models::{DisplayEntry, Selectable};
use crate::selection::SelectionStore;
use crate::traits::SearchSource;

/// What happened to a `set_query` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Query too short: results cleared without a request.
    Cleared,
    /// Response applied; carries the number of hits.
    Applied(usize),
    /// A newer query was set before this one completed; nothing applied.
    Superseded,
}

/// Read-only view of the coordinator state for the host view.
#[derive(Debug, Clone)]
pub struct SearchSnapshot<T> {
    pub query: String,
    pub display: Vec<DisplayEntry<T>>,
    /// Selected items sorted by display name.
    pub selected: Vec<T>,
}

impl<T> Default for SearchSnapshot<T> {
    fn default() -> Self {
        Self {
            query: String::new(),
            display: Vec::new(),
            selected: Vec::new(),
        }
    }
}

struct SearchState<T: Selectable> {
    query: String,
    generation: u64,
    latest_results: Vec<T>,
    selection: SelectionStore<T>,
    display: Vec<DisplayEntry<T>>,
}

/// Search box state machine, generic over the item type.
pub struct SearchCoordinator<S: SearchSource> {
    source: S,
    min_query_chars: usize,
    state: Mutex<SearchState<S::Item>>,
    updates: watch::Sender<SearchSnapshot<S::Item>>,
}

impl<S: SearchSource> SearchCoordinator<S> {
    pub fn new(source: S, min_query_chars: usize) -> Self {
        let (updates, _) = watch::channel(SearchSnapshot::default());
        Self {
            source,
            min_query_chars,
            state: Mutex::new(SearchState {
                query: String::new(),
                generation: 0,
                latest_results: Vec::new(),
                selection: SelectionStore::new(),
                display: Vec::new(),
            }),
            updates,
        }
    }

    /// Set the query and, if long enough, search for it.
    pub async fn set_query(&self, query: &str) -> ApiResult<QueryOutcome> {
        match self.begin(query) {
            Some(generation) => self.run(query, generation).await,
            None => Ok(QueryOutcome::Cleared),
        }
    }

    /// Like [`set_query`](Self::set_query), but wait `delay` first and skip
    /// the request entirely if another query was set in the meantime.
    pub async fn set_query_debounced(
        &self,
        query: &str,
        delay: Duration,
    ) -> ApiResult<QueryOutcome> {
        let Some(generation) = self.begin(query) else {
            return Ok(QueryOutcome::Cleared);
        };
        tokio::time::sleep(delay).await;
        if self.lock().generation != generation {
            debug!(source = self.source.label(), query, "debounced query superseded");
            return Ok(QueryOutcome::Superseded);
        }
        self.run(query, generation).await
    }

    /// Flip selection of `item` and return the selected items sorted by
    /// display name.
    pub fn toggle_selection(&self, item: S::Item) -> Vec<S::Item> {
        let mut state = self.lock();
        state.selection.toggle(item);
        self.recompute(&mut state);
        state.selection.sorted()
    }

    /// Rebuild the display list from the current results and selection.
    pub fn recompute_display_list(&self) {
        let mut state = self.lock();
        self.recompute(&mut state);
    }

    pub fn display_list(&self) -> Vec<DisplayEntry<S::Item>> {
        self.lock().display.clone()
    }

    pub fn latest_results(&self) -> Vec<S::Item> {
        self.lock().latest_results.clone()
    }

    pub fn selected(&self) -> Vec<S::Item> {
        self.lock().selection.sorted()
    }

    pub fn snapshot(&self) -> SearchSnapshot<S::Item> {
        self.updates.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot<S::Item>> {
        self.updates.subscribe()
    }

    /// Record the new query and generation. Returns `None` when the query is
    /// too short (results already cleared), otherwise the generation to run.
    fn begin(&self, query: &str) -> Option<u64> {
        let mut state = self.lock();
        state.generation += 1;
        state.query = query.to_string();

        if query.chars().count() < self.min_query_chars {
            debug!(source = self.source.label(), query, "query too short, clearing results");
            state.latest_results.clear();
            self.recompute(&mut state);
            return None;
        }
        // Results stay until a response arrives; only the query changes now.
        self.updates
            .send_modify(|snapshot| snapshot.query = state.query.clone());
        Some(state.generation)
    }

    async fn run(&self, query: &str, generation: u64) -> ApiResult<QueryOutcome> {
        debug!(source = self.source.label(), query, generation, "issuing search");
        let response = self.source.search(query).await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!(
                source = self.source.label(),
                query,
                generation,
                current = state.generation,
                "discarding stale search response"
            );
            return Ok(QueryOutcome::Superseded);
        }

        let results = response?;
        let hits = results.len();
        state.selection.refresh(&results);
        state.latest_results = results;
        self.recompute(&mut state);
        Ok(QueryOutcome::Applied(hits))
    }

    fn recompute(&self, state: &mut SearchState<S::Item>) {
        state.display = merge_display_list(&state.latest_results, &state.selection);
        let snapshot = SearchSnapshot {
            query: state.query.clone(),
            display: state.display.clone(),
            selected: state.selection.sorted(),
        };
        self.updates.send_replace(snapshot);
    }

    fn lock(&self) -> MutexGuard<'_, SearchState<S::Item>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Merge search hits with selected items that are not among them.
pub fn merge_display_list<T: Selectable>(
    results: &[T],
    selection: &SelectionStore<T>,
) -> Vec<DisplayEntry<T>> {
    let mut merged: Vec<DisplayEntry<T>> = results
        .iter()
        .map(|item| DisplayEntry {
            from_search: true,
            item: item.clone(),
        })
        .collect();

    for selected in selection.iter() {
        let name = selected.display_name();
        let already_shown = results.iter().any(|hit| hit.display_name() == name);
        if !already_shown {
            merged.push(DisplayEntry {
                from_search: false,
                item: selected.clone(),
            });
        }
    }

    // Stable: hits with equal names keep server order.
    merged.sort_by(|a, b| {
        b.from_search
            .cmp(&a.from_search)
            .then_with(|| a.item.display_name().cmp(&b.item.display_name()))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::models::{CategoryRef, EntityRef};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    /// Source answering from a fixed table and recording every query.
    struct TableSource<T> {
        table: HashMap<String, Vec<T>>,
        calls: Mutex<Vec<String>>,
    }

    impl<T> TableSource<T> {
        fn new(entries: Vec<(&str, Vec<T>)>) -> Self {
            Self {
                table: entries
                    .into_iter()
                    .map(|(q, hits)| (q.to_string(), hits))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl<T: Selectable> SearchSource for TableSource<T> {
        type Item = T;

        fn label(&self) -> &str {
            "table"
        }

        async fn search(&self, query: &str) -> ApiResult<Vec<T>> {
            self.calls.lock().unwrap().push(query.to_string());
            Ok(self.table.get(query).cloned().unwrap_or_default())
        }
    }

    /// Source whose responses are released by the test, one per query.
    struct GatedSource {
        gates: Mutex<HashMap<String, oneshot::Receiver<ApiResult<Vec<CategoryRef>>>>>,
    }

    #[async_trait]
    impl SearchSource for GatedSource {
        type Item = CategoryRef;

        fn label(&self) -> &str {
            "gated"
        }

        async fn search(&self, query: &str) -> ApiResult<Vec<CategoryRef>> {
            let gate = self.gates.lock().unwrap().remove(query).expect("gate for query");
            gate.await.expect("gate released")
        }
    }

    fn gated(
        queries: &[&str],
    ) -> (
        GatedSource,
        HashMap<String, oneshot::Sender<ApiResult<Vec<CategoryRef>>>>,
    ) {
        let mut gates = HashMap::new();
        let mut senders = HashMap::new();
        for q in queries {
            let (tx, rx) = oneshot::channel();
            gates.insert(q.to_string(), rx);
            senders.insert(q.to_string(), tx);
        }
        (
            GatedSource {
                gates: Mutex::new(gates),
            },
            senders,
        )
    }

    fn cats(names: &[&str]) -> Vec<CategoryRef> {
        names.iter().map(|n| CategoryRef::new(*n)).collect()
    }

    fn names<T: Selectable>(display: &[DisplayEntry<T>]) -> Vec<(bool, String)> {
        display
            .iter()
            .map(|e| (e.from_search, e.item.display_name().into_owned()))
            .collect()
    }

    #[tokio::test]
    async fn short_query_issues_no_request_and_clears() {
        let source = TableSource::new(vec![("Parc", cats(&["Parc naturel"]))]);
        let coord = SearchCoordinator::new(source, 3);

        assert_eq!(coord.set_query("Parc").await.unwrap(), QueryOutcome::Applied(1));
        assert_eq!(coord.latest_results().len(), 1);

        for short in ["", "P", "Pa"] {
            let outcome = coord.set_query(short).await.unwrap();
            assert_eq!(outcome, QueryOutcome::Cleared);
            assert!(coord.latest_results().is_empty());
        }
        assert_eq!(*coord.source.calls.lock().unwrap(), vec!["Parc"]);
    }

    #[tokio::test]
    async fn two_char_prefix_no_request_then_four_char_request() {
        let source = TableSource::new(vec![("Parc", cats(&["Parc naturel"]))]);
        let coord = SearchCoordinator::new(source, 3);

        coord.set_query("Pa").await.unwrap();
        assert!(coord.source.calls.lock().unwrap().is_empty());

        coord.set_query("Parc").await.unwrap();
        assert_eq!(*coord.source.calls.lock().unwrap(), vec!["Parc"]);
    }

    #[tokio::test]
    async fn query_length_counts_characters_not_bytes() {
        let source = TableSource::new(vec![("été", cats(&["Été"]))]);
        let coord = SearchCoordinator::new(source, 3);
        assert_eq!(coord.set_query("ét").await.unwrap(), QueryOutcome::Cleared);
        assert_eq!(coord.set_query("été").await.unwrap(), QueryOutcome::Applied(1));
    }

    #[tokio::test]
    async fn repeated_identical_queries_are_not_deduplicated() {
        let source = TableSource::new(vec![("Lyon", cats(&["Lyon"]))]);
        let coord = SearchCoordinator::new(source, 3);
        coord.set_query("Lyon").await.unwrap();
        coord.set_query("Lyon").await.unwrap();
        assert_eq!(coord.source.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn late_response_for_older_query_is_discarded() {
        let (source, mut senders) = gated(&["Paris", "Parc"]);
        let coord = SearchCoordinator::new(source, 3);

        let first = coord.set_query("Paris");
        let second = coord.set_query("Parc");
        let paris_tx = senders.remove("Paris").unwrap();
        let parc_tx = senders.remove("Parc").unwrap();

        let release = async {
            tokio::task::yield_now().await;
            // Newer query answers first, older one afterwards.
            parc_tx.send(Ok(cats(&["Parc naturel"]))).unwrap();
            tokio::task::yield_now().await;
            paris_tx.send(Ok(cats(&["Paris", "Paris Saint-Germain"]))).unwrap();
        };

        let (a, b, ()) = tokio::join!(first, second, release);
        assert_eq!(a.unwrap(), QueryOutcome::Superseded);
        assert_eq!(b.unwrap(), QueryOutcome::Applied(1));
        assert_eq!(coord.latest_results(), cats(&["Parc naturel"]));
        assert_eq!(coord.snapshot().query, "Parc");
    }

    #[tokio::test]
    async fn older_response_arriving_first_is_replaced_by_newer() {
        let (source, mut senders) = gated(&["Paris", "Parc"]);
        let coord = SearchCoordinator::new(source, 3);

        let paris_tx = senders.remove("Paris").unwrap();
        let parc_tx = senders.remove("Parc").unwrap();
        let release = async {
            tokio::task::yield_now().await;
            paris_tx.send(Ok(cats(&["Paris"]))).unwrap();
            tokio::task::yield_now().await;
            parc_tx.send(Ok(cats(&["Parc naturel"]))).unwrap();
        };

        let (a, b, ()) = tokio::join!(coord.set_query("Paris"), coord.set_query("Parc"), release);
        assert_eq!(a.unwrap(), QueryOutcome::Superseded);
        assert_eq!(b.unwrap(), QueryOutcome::Applied(1));
        assert_eq!(coord.latest_results(), cats(&["Parc naturel"]));
    }

    #[tokio::test]
    async fn short_query_supersedes_in_flight_search() {
        let (source, mut senders) = gated(&["Paris"]);
        let coord = SearchCoordinator::new(source, 3);
        let paris_tx = senders.remove("Paris").unwrap();

        let release = async {
            tokio::task::yield_now().await;
            assert_eq!(coord.set_query("Pa").await.unwrap(), QueryOutcome::Cleared);
            paris_tx.send(Ok(cats(&["Paris"]))).unwrap();
        };
        let (a, ()) = tokio::join!(coord.set_query("Paris"), release);
        assert_eq!(a.unwrap(), QueryOutcome::Superseded);
        assert!(coord.latest_results().is_empty());
    }

    #[tokio::test]
    async fn stale_error_is_discarded_current_error_surfaces() {
        let (source, mut senders) = gated(&["Paris", "Parc"]);
        let coord = SearchCoordinator::new(source, 3);
        let paris_tx = senders.remove("Paris").unwrap();
        let parc_tx = senders.remove("Parc").unwrap();

        let release = async {
            tokio::task::yield_now().await;
            paris_tx
                .send(Err(ApiError::precondition("stale failure")))
                .unwrap();
            parc_tx
                .send(Err(ApiError::auth(None, "current failure")))
                .unwrap();
        };
        let (a, b, ()) = tokio::join!(coord.set_query("Paris"), coord.set_query("Parc"), release);
        assert_eq!(a.unwrap(), QueryOutcome::Superseded);
        assert!(matches!(b, Err(ApiError::Auth { .. })));
    }

    #[tokio::test]
    async fn selected_item_outside_results_is_listed_after_hits() {
        let source = TableSource::new(vec![("France", vec![EntityRef::new(7, "France", "")])]);
        let coord = SearchCoordinator::new(source, 3);

        let selected = coord.toggle_selection(EntityRef::new(42, "Mauritius", ""));
        assert_eq!(selected, vec![EntityRef::new(42, "Mauritius", "")]);

        coord.set_query("France").await.unwrap();
        let display = coord.display_list();
        assert_eq!(
            display,
            vec![
                DisplayEntry {
                    from_search: true,
                    item: EntityRef::new(7, "France", "")
                },
                DisplayEntry {
                    from_search: false,
                    item: EntityRef::new(42, "Mauritius", "")
                },
            ]
        );
    }

    #[tokio::test]
    async fn selected_item_that_is_also_a_hit_appears_once() {
        let source = TableSource::new(vec![("Parc", cats(&["Parc national", "Parc naturel"]))]);
        let coord = SearchCoordinator::new(source, 3);

        coord.toggle_selection(CategoryRef::new("Parc naturel"));
        coord.toggle_selection(CategoryRef::new("Alpes"));
        coord.set_query("Parc").await.unwrap();

        assert_eq!(
            names(&coord.display_list()),
            vec![
                (true, "Parc national".to_string()),
                (true, "Parc naturel".to_string()),
                (false, "Alpes".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn non_search_items_sorted_by_name_after_hits() {
        let source = TableSource::new(vec![("Zoo", cats(&["Zoo"]))]);
        let coord = SearchCoordinator::new(source, 3);
        for name in ["Marseille", "Bordeaux", "Lille"] {
            coord.toggle_selection(CategoryRef::new(name));
        }
        coord.set_query("Zoo").await.unwrap();
        assert_eq!(
            names(&coord.display_list()),
            vec![
                (true, "Zoo".to_string()),
                (false, "Bordeaux".to_string()),
                (false, "Lille".to_string()),
                (false, "Marseille".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn selections_survive_result_changes_and_short_queries() {
        let source = TableSource::new(vec![
            ("Lyon", cats(&["Lyon"])),
            ("Nantes", cats(&["Nantes"])),
        ]);
        let coord = SearchCoordinator::new(source, 3);

        coord.set_query("Lyon").await.unwrap();
        coord.toggle_selection(CategoryRef::new("Lyon"));
        coord.set_query("Nantes").await.unwrap();
        assert_eq!(
            names(&coord.display_list()),
            vec![(true, "Nantes".to_string()), (false, "Lyon".to_string())]
        );

        coord.set_query("").await.unwrap();
        assert_eq!(names(&coord.display_list()), vec![(false, "Lyon".to_string())]);
    }

    #[tokio::test]
    async fn toggle_twice_deselects() {
        let source = TableSource::new(vec![("Lyon", cats(&["Lyon"]))]);
        let coord = SearchCoordinator::new(source, 3);
        coord.set_query("Lyon").await.unwrap();

        assert_eq!(coord.toggle_selection(CategoryRef::new("Lyon")).len(), 1);
        assert!(coord.toggle_selection(CategoryRef::new("Lyon")).is_empty());
        assert_eq!(names(&coord.display_list()), vec![(true, "Lyon".to_string())]);
    }

    #[tokio::test]
    async fn toggle_returns_selection_sorted_by_name() {
        let source = TableSource::<CategoryRef>::new(vec![]);
        let coord = SearchCoordinator::new(source, 3);
        coord.toggle_selection(CategoryRef::new("Nice"));
        coord.toggle_selection(CategoryRef::new("Brest"));
        let selected = coord.toggle_selection(CategoryRef::new("Metz"));
        assert_eq!(selected, cats(&["Brest", "Metz", "Nice"]));
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let source = TableSource::new(vec![("Parc", cats(&["Parc b", "Parc a"]))]);
        let coord = SearchCoordinator::new(source, 3);
        coord.toggle_selection(CategoryRef::new("Zermatt"));
        coord.set_query("Parc").await.unwrap();

        coord.recompute_display_list();
        let first = coord.display_list();
        coord.recompute_display_list();
        assert_eq!(first, coord.display_list());
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let source = TableSource::new(vec![("Lyon", cats(&["Lyon"]))]);
        let coord = SearchCoordinator::new(source, 3);
        let mut rx = coord.subscribe();

        coord.set_query("Lyon").await.unwrap();
        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.query, "Lyon");
        assert_eq!(names(&snap.display), vec![(true, "Lyon".to_string())]);
    }

    #[tokio::test]
    async fn refreshed_search_hit_updates_selected_value() {
        let source = TableSource::new(vec![(
            "Mauritius",
            vec![EntityRef::new(42, "Mauritius", "island country")],
        )]);
        let coord = SearchCoordinator::new(source, 3);
        coord.toggle_selection(EntityRef::new(42, "Mauritius", ""));
        coord.set_query("Mauritius").await.unwrap();
        assert_eq!(coord.selected()[0].description, "island country");
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_query_skips_request_when_superseded() {
        let source = TableSource::new(vec![
            ("Lyo", cats(&["Lyon"])),
            ("Lyon", cats(&["Lyon"])),
        ]);
        let coord = SearchCoordinator::new(source, 3);
        let delay = Duration::from_millis(250);

        let (a, b) = tokio::join!(coord.set_query_debounced("Lyo", delay), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            coord.set_query_debounced("Lyon", delay).await
        });

        assert_eq!(a.unwrap(), QueryOutcome::Superseded);
        assert_eq!(b.unwrap(), QueryOutcome::Applied(1));
        assert_eq!(*coord.source.calls.lock().unwrap(), vec!["Lyon"]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_short_query_clears_immediately() {
        let source = TableSource::<CategoryRef>::new(vec![]);
        let coord = SearchCoordinator::new(source, 3);
        let outcome = coord
            .set_query_debounced("Ly", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome, QueryOutcome::Cleared);
        assert!(coord.source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_tracks_query_while_search_is_pending_or_failed() {
        let (source, mut senders) = gated(&["Lyon", "Nantes"]);
        let coord = SearchCoordinator::new(source, 3);

        senders
            .remove("Lyon")
            .unwrap()
            .send(Ok(cats(&["Lyon"])))
            .unwrap();
        coord.set_query("Lyon").await.unwrap();

        let nantes_tx = senders.remove("Nantes").unwrap();
        let mut updates = coord.subscribe();
        let release = async {
            updates.changed().await.unwrap();
            let pending = updates.borrow_and_update().clone();
            assert_eq!(pending.query, "Nantes");
            assert_eq!(names(&pending.display), vec![(true, "Lyon".to_string())]);
            nantes_tx
                .send(Err(ApiError::precondition("search failed")))
                .unwrap();
        };

        let (result, ()) = tokio::join!(coord.set_query("Nantes"), release);
        assert!(result.is_err());
        assert_eq!(coord.snapshot().query, "Nantes");
        assert_eq!(coord.latest_results(), cats(&["Lyon"]));
    }

    #[test]
    fn merge_on_empty_inputs_is_empty() {
        let selection = SelectionStore::<CategoryRef>::new();
        assert!(merge_display_list(&[], &selection).is_empty());
    }
}
