//! Subject level steps

use crate::migration::types::{AddSubject, PolicyDocument, ReplaceSubject, Subject};

/// Rename `old` to `new` in every entry that has it.
///
/// Returns true if at least one entry was touched.
pub fn replace_subject(policy: &mut PolicyDocument, replace: &ReplaceSubject) -> bool {
    let mut changed = false;
    for entry in policy.entries.values_mut() {
        if entry.subjects.remove(&replace.old).is_some() {
            entry
                .subjects
                .insert(replace.new.clone(), Subject::of_type(&replace.subject_type));
            changed = true;
        }
    }
    changed
}

/// Insert or overwrite a subject in the entry named by `label`.
///
/// A missing entry, or a subject already present with the same type, is a no-op.
pub fn add_subject(policy: &mut PolicyDocument, add: &AddSubject) -> bool {
    let Some(entry) = policy.entries.get_mut(&add.label) else {
        return false;
    };
    let subject = Subject::of_type(&add.subject_type);
    if entry.subjects.get(&add.subject) == Some(&subject) {
        return false;
    }
    entry.subjects.insert(add.subject.clone(), subject);
    true
}
