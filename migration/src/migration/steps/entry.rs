//! Entry level steps

use crate::migration::types::{AddEntry, PolicyDocument, ReplaceEntries};

/// Insert the entry; an existing label is only overwritten with `replace`
pub fn add_entry(policy: &mut PolicyDocument, add: &AddEntry) -> bool {
    match policy.entries.get(&add.label) {
        Some(_) if !add.replace => return false,
        Some(existing) if *existing == add.entry => return false,
        _ => {}
    }
    policy.entries.insert(add.label.clone(), add.entry.clone());
    true
}

/// Swap the whole entries mapping; reports a change only if it differs
pub fn replace_entries(policy: &mut PolicyDocument, replace: &ReplaceEntries) -> bool {
    if policy.entries == replace.policy_entries {
        return false;
    }
    policy.entries = replace.policy_entries.clone();
    true
}
