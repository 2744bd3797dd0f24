//! Field-level access policy for character sheet saves.
//!
//! Every `character:save` runs its patch through [`filter_update`] before
//! anything is merged. The table below is the only place that decides who
//! may write which field.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Never written by a save.
    Immutable,
    /// Computed server-side on every save.
    Derived,
    MasterOnly,
    OwnerOrMaster,
}

const POLICY: &[(&str, FieldAccess)] = &[
    ("id", FieldAccess::Immutable),
    ("created_at", FieldAccess::Immutable),
    ("table_id", FieldAccess::Immutable),
    ("user_id", FieldAccess::Immutable),
    ("level", FieldAccess::Derived),
    ("gold", FieldAccess::MasterOnly),
    ("silver", FieldAccess::MasterOnly),
    ("copper", FieldAccess::MasterOnly),
    ("xp", FieldAccess::MasterOnly),
    ("backpack_items", FieldAccess::MasterOnly),
    ("backpack_max_load", FieldAccess::MasterOnly),
    ("mount_items", FieldAccess::MasterOnly),
    ("mount_max_load", FieldAccess::MasterOnly),
    ("name", FieldAccess::OwnerOrMaster),
    ("age", FieldAccess::OwnerOrMaster),
    ("height", FieldAccess::OwnerOrMaster),
    ("weight", FieldAccess::OwnerOrMaster),
    ("race", FieldAccess::OwnerOrMaster),
    ("class", FieldAccess::OwnerOrMaster),
    ("alignment_law", FieldAccess::OwnerOrMaster),
    ("alignment_moral", FieldAccess::OwnerOrMaster),
    ("history", FieldAccess::OwnerOrMaster),
    ("icon_url", FieldAccess::OwnerOrMaster),
    ("hit_points", FieldAccess::OwnerOrMaster),
    ("current_hp", FieldAccess::OwnerOrMaster),
    ("mana", FieldAccess::OwnerOrMaster),
    ("strength", FieldAccess::OwnerOrMaster),
    ("defense", FieldAccess::OwnerOrMaster),
    ("resistance", FieldAccess::OwnerOrMaster),
    ("intelligence", FieldAccess::OwnerOrMaster),
    ("wisdom", FieldAccess::OwnerOrMaster),
    ("stealth", FieldAccess::OwnerOrMaster),
    ("reflexes", FieldAccess::OwnerOrMaster),
    ("charisma", FieldAccess::OwnerOrMaster),
    ("constitution", FieldAccess::OwnerOrMaster),
    ("light_cutting_weapons", FieldAccess::OwnerOrMaster),
    ("heavy_cutting_weapons", FieldAccess::OwnerOrMaster),
    ("short_bows", FieldAccess::OwnerOrMaster),
    ("long_bows", FieldAccess::OwnerOrMaster),
    ("spears", FieldAccess::OwnerOrMaster),
    ("armor", FieldAccess::OwnerOrMaster),
    ("horses", FieldAccess::OwnerOrMaster),
    ("traps", FieldAccess::OwnerOrMaster),
    ("potions", FieldAccess::OwnerOrMaster),
    ("others", FieldAccess::OwnerOrMaster),
    ("left_hand", FieldAccess::OwnerOrMaster),
    ("right_hand", FieldAccess::OwnerOrMaster),
    ("torso", FieldAccess::OwnerOrMaster),
    ("legs", FieldAccess::OwnerOrMaster),
    ("boots", FieldAccess::OwnerOrMaster),
    ("belt", FieldAccess::OwnerOrMaster),
    ("back", FieldAccess::OwnerOrMaster),
    ("mount_name", FieldAccess::OwnerOrMaster),
];

#[must_use]
pub fn field_access(field: &str) -> Option<FieldAccess> {
    POLICY.iter().find(|(name, _)| *name == field).map(|(_, access)| *access)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("only the owner or the master can edit this character")]
    NotOwner,
    #[error("unknown character field: {0}")]
    UnknownField(String),
}

/// The writable part of a patch plus the fields that were dropped.
#[derive(Debug, Default, PartialEq)]
pub struct FilteredPatch {
    pub fields: Map<String, Value>,
    /// Master-only fields dropped from a non-master owner's save. Immutable
    /// and derived fields are dropped silently.
    pub stripped_fields: Vec<String>,
}

/// Apply the policy table to a save request.
///
/// # Errors
///
/// Returns `NotOwner` when the caller is neither the owner nor a master and
/// `UnknownField` for any key missing from the table.
pub fn filter_update(
    patch: &Map<String, Value>,
    is_owner: bool,
    is_master: bool,
) -> Result<FilteredPatch, PolicyError> {
    if !is_owner && !is_master {
        return Err(PolicyError::NotOwner);
    }

    let mut out = FilteredPatch::default();
    for (field, value) in patch {
        let access = field_access(field).ok_or_else(|| PolicyError::UnknownField(field.clone()))?;
        match access {
            FieldAccess::Immutable | FieldAccess::Derived => {}
            FieldAccess::MasterOnly if !is_master => out.stripped_fields.push(field.clone()),
            FieldAccess::MasterOnly | FieldAccess::OwnerOrMaster => {
                out.fields.insert(field.clone(), value.clone());
            }
        }
    }
    out.stripped_fields.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn owner_gold_is_stripped() {
        let filtered = filter_update(&patch(json!({"name": "Aria", "gold": 999})), true, false).unwrap();
        assert_eq!(filtered.fields.get("name"), Some(&json!("Aria")));
        assert!(!filtered.fields.contains_key("gold"));
        assert_eq!(filtered.stripped_fields, vec!["gold".to_owned()]);
    }

    #[test]
    fn master_writes_master_only_fields() {
        let filtered =
            filter_update(&patch(json!({"gold": 10, "xp": 250, "backpack_max_load": 30.0})), false, true).unwrap();
        assert_eq!(filtered.fields.len(), 3);
        assert!(filtered.stripped_fields.is_empty());
    }

    #[test]
    fn immutable_and_derived_fields_never_pass() {
        let filtered = filter_update(
            &patch(json!({"id": "x", "user_id": "y", "table_id": "z", "created_at": "t", "level": 99})),
            true,
            true,
        )
        .unwrap();
        assert!(filtered.fields.is_empty());
        assert!(filtered.stripped_fields.is_empty());
    }

    #[test]
    fn stranger_is_rejected() {
        assert_eq!(filter_update(&patch(json!({"name": "x"})), false, false), Err(PolicyError::NotOwner));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert_eq!(
            filter_update(&patch(json!({"password": "x"})), true, true),
            Err(PolicyError::UnknownField("password".into()))
        );
    }

    #[test]
    fn every_inventory_field_is_master_only() {
        for field in ["backpack_items", "backpack_max_load", "mount_items", "mount_max_load"] {
            assert_eq!(field_access(field), Some(FieldAccess::MasterOnly), "{field}");
        }
        assert_eq!(field_access("mount_name"), Some(FieldAccess::OwnerOrMaster));
    }
}
