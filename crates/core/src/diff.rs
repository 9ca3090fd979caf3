//! Change-detection engine.
//!
//! [`diff`] compares the current feed snapshot against the saved
//! [`FeedBaseline`] and classifies every entity as new, updated, removed
//! or unchanged using content [`Signature`]s.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::signature::Signature;
use crate::snapshot::{EntitySnapshot, FeedBaseline};

/// Classification of a changed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    /// Present only in the current snapshot.
    New,
    /// Present in both with a different signature.
    Updated,
    /// Present only in the baseline.
    Removed,
}

impl DiffAction {
    /// String representation for display and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for DiffAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity tagged with the action downstream consumers should take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedEntity {
    #[serde(flatten)]
    pub entity: EntitySnapshot,
    #[serde(rename = "_action")]
    pub action: DiffAction,
}

impl TaggedEntity {
    fn new(entity: EntitySnapshot, action: DiffAction) -> Self {
        Self { entity, action }
    }
}

/// Outcome of one diff pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    pub added: Vec<TaggedEntity>,
    pub updated: Vec<TaggedEntity>,
    /// Delisted entities, carried forward with every quantity zeroed.
    pub removed: Vec<TaggedEntity>,
    pub unchanged_count: usize,
    /// Current entities that had no stable id and were left out.
    pub skipped_without_id: usize,
}

impl DiffResult {
    /// Every entity that needs downstream work, in added/updated/removed order.
    pub fn changed(&self) -> impl Iterator<Item = &TaggedEntity> {
        self.added
            .iter()
            .chain(self.updated.iter())
            .chain(self.removed.iter())
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Diff behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Skip comparison and mark every current entity as new (backfills).
    pub force_full: bool,
}

/// Compare `current` against `baseline`.
///
/// With no baseline (first run) or with [`DiffOptions::force_full`] every
/// current entity is reported as added and nothing is removed.
///
/// Fails only on malformed input (duplicate ids or non-finite prices in
/// `current`); callers treat that as fatal for the whole run.
pub fn diff(
    current: &[EntitySnapshot],
    baseline: Option<&FeedBaseline>,
    options: DiffOptions,
) -> Result<DiffResult, CoreError> {
    let mut result = DiffResult::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(current.len());

    for entity in current {
        if !entity.has_stable_id() {
            result.skipped_without_id += 1;
            continue;
        }
        validate(entity)?;
        if !seen.insert(entity.id.as_str()) {
            return Err(CoreError::Validation(format!(
                "duplicate entity id '{}' in current snapshot",
                entity.id
            )));
        }

        let previous = match baseline {
            Some(baseline) if !options.force_full => baseline.get(&entity.id),
            _ => None,
        };

        match previous {
            None => result
                .added
                .push(TaggedEntity::new(entity.clone(), DiffAction::New)),
            Some(previous) if Signature::of(previous) != Signature::of(entity) => result
                .updated
                .push(TaggedEntity::new(entity.clone(), DiffAction::Updated)),
            Some(_) => result.unchanged_count += 1,
        }
    }

    if let Some(baseline) = baseline.filter(|_| !options.force_full) {
        result.removed = baseline
            .entities
            .values()
            .filter(|previous| !seen.contains(previous.id.as_str()))
            .map(|previous| TaggedEntity::new(previous.with_zeroed_stock(), DiffAction::Removed))
            .collect();
    }

    Ok(result)
}

fn validate(entity: &EntitySnapshot) -> Result<(), CoreError> {
    match entity.variants.iter().find(|v| !v.price.is_finite()) {
        Some(bad) => Err(CoreError::Validation(format!(
            "entity '{}' size '{}' has a non-finite price",
            entity.id, bad.size_key
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::VariantSnapshot;
    use assert_matches::assert_matches;
    use std::collections::BTreeSet;

    fn entity(id: &str, prices: &[(&str, f64, i64)]) -> EntitySnapshot {
        prices
            .iter()
            .fold(EntitySnapshot::new(id), |e, (size, price, qty)| {
                e.with_variant(VariantSnapshot::new(size, *price, *qty))
            })
    }

    fn ids(tagged: &[TaggedEntity]) -> BTreeSet<String> {
        tagged.iter().map(|t| t.entity.id.clone()).collect()
    }

    // -- First run ---------------------------------------------------------

    #[test]
    fn first_run_marks_everything_added() {
        let current = vec![
            entity("A", &[("42", 100.0, 1)]),
            entity("B", &[("43", 110.0, 2)]),
            entity("C", &[]),
        ];
        let result = diff(&current, None, DiffOptions::default()).unwrap();
        assert_eq!(result.added.len(), 3);
        assert!(result.updated.is_empty());
        assert!(result.removed.is_empty());
        assert_eq!(result.unchanged_count, 0);
        assert!(result.added.iter().all(|t| t.action == DiffAction::New));
    }

    // -- Classification ----------------------------------------------------

    #[test]
    fn classifies_new_updated_removed_and_unchanged() {
        let baseline = FeedBaseline::from_entities(vec![
            entity("KEEP", &[("42", 100.0, 1)]),
            entity("CHANGE", &[("42", 100.0, 1)]),
            entity("GONE", &[("42", 90.0, 5), ("43", 95.0, 2)]),
        ]);
        let current = vec![
            entity("KEEP", &[("42", 100.0, 1)]),
            entity("CHANGE", &[("42", 105.0, 1)]),
            entity("FRESH", &[("44", 120.0, 1)]),
        ];

        let result = diff(&current, Some(&baseline), DiffOptions::default()).unwrap();
        assert_eq!(ids(&result.added), BTreeSet::from(["FRESH".to_string()]));
        assert_eq!(ids(&result.updated), BTreeSet::from(["CHANGE".to_string()]));
        assert_eq!(ids(&result.removed), BTreeSet::from(["GONE".to_string()]));
        assert_eq!(result.unchanged_count, 1);
        assert_eq!(result.change_count(), 3);
    }

    #[test]
    fn removed_entities_have_zero_quantity() {
        let baseline = FeedBaseline::from_entities(vec![entity(
            "GONE",
            &[("42", 90.0, 5), ("43", 95.0, 2)],
        )]);
        let result = diff(&[], Some(&baseline), DiffOptions::default()).unwrap();
        let removed = &result.removed[0];
        assert_eq!(removed.action, DiffAction::Removed);
        assert!(removed
            .entity
            .variants
            .iter()
            .all(|v| v.available_quantity == 0));
        assert_eq!(removed.entity.variants[0].price, 90.0);
    }

    #[test]
    fn reordered_variants_are_unchanged() {
        let baseline =
            FeedBaseline::from_entities(vec![entity("A", &[("42", 100.0, 1), ("43", 110.0, 2)])]);
        let current = vec![entity("A", &[("43", 110.0, 2), ("42", 100.0, 1)])];
        let result = diff(&current, Some(&baseline), DiffOptions::default()).unwrap();
        assert_eq!(result.unchanged_count, 1);
        assert_eq!(result.change_count(), 0);
    }

    // -- Symmetry ----------------------------------------------------------

    #[test]
    fn added_and_removed_are_symmetric() {
        let a = vec![
            entity("A", &[("42", 100.0, 1)]),
            entity("B", &[("42", 100.0, 1)]),
            entity("SHARED", &[("42", 80.0, 3)]),
        ];
        let b = vec![
            entity("C", &[("40", 70.0, 1)]),
            entity("SHARED", &[("42", 85.0, 3)]),
        ];
        let base_a = FeedBaseline::from_entities(a.clone());
        let base_b = FeedBaseline::from_entities(b.clone());

        let a_vs_b = diff(&a, Some(&base_b), DiffOptions::default()).unwrap();
        let b_vs_a = diff(&b, Some(&base_a), DiffOptions::default()).unwrap();

        assert_eq!(ids(&a_vs_b.added), ids(&b_vs_a.removed));
        assert_eq!(ids(&a_vs_b.removed), ids(&b_vs_a.added));
        assert_eq!(ids(&a_vs_b.updated), ids(&b_vs_a.updated));
    }

    // -- Options and edge cases -------------------------------------------

    #[test]
    fn force_full_marks_everything_added() {
        let baseline = FeedBaseline::from_entities(vec![
            entity("A", &[("42", 100.0, 1)]),
            entity("OLD", &[("42", 100.0, 1)]),
        ]);
        let current = vec![entity("A", &[("42", 100.0, 1)])];
        let result = diff(&current, Some(&baseline), DiffOptions { force_full: true }).unwrap();
        assert_eq!(ids(&result.added), BTreeSet::from(["A".to_string()]));
        assert_eq!(result.unchanged_count, 0);
        assert!(result.removed.is_empty());
    }

    #[test]
    fn entities_without_id_are_skipped_and_counted() {
        let current = vec![entity("", &[("42", 1.0, 1)]), entity("A", &[])];
        let result = diff(&current, None, DiffOptions::default()).unwrap();
        assert_eq!(result.skipped_without_id, 1);
        assert_eq!(ids(&result.added), BTreeSet::from(["A".to_string()]));
    }

    #[test]
    fn duplicate_ids_are_malformed() {
        let current = vec![entity("A", &[]), entity("A", &[])];
        assert_matches!(
            diff(&current, None, DiffOptions::default()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn non_finite_prices_are_malformed() {
        let current = vec![entity("A", &[("42", f64::NAN, 1)])];
        assert_matches!(
            diff(&current, None, DiffOptions::default()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn tagged_entity_serializes_action_field() {
        let tagged = TaggedEntity::new(EntitySnapshot::new("A"), DiffAction::Removed);
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["_action"], "removed");
        assert_eq!(json["id"], "A");
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(DiffAction::New.to_string(), "new");
        assert_eq!(DiffAction::Updated.to_string(), "updated");
    }
}
