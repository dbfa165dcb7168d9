//! Parent-link repair after messages are removed.

use std::collections::{HashMap, HashSet};

use crate::session::Message;

/// `id -> parent id` for every message that has an id.
pub fn parent_index(messages: &[Message]) -> HashMap<&str, Option<&str>> {
    messages
        .iter()
        .filter_map(|message| message.id().map(|id| (id, message.parent_id())))
        .collect()
}

/// Walk up from `start` through `index` to the first id in `surviving`.
///
/// Ids unknown to `index` are returned as-is: they were never part of the
/// input, so no strategy removed them.
pub fn nearest_surviving<'a>(
    start: &'a str,
    index: &HashMap<&'a str, Option<&'a str>>,
    surviving: &HashSet<String>,
) -> Option<&'a str> {
    let mut current = start;
    for _ in 0..=index.len() {
        if surviving.contains(current) {
            return Some(current);
        }
        match index.get(current) {
            None => return Some(current),
            Some(None) => return None,
            Some(Some(parent)) => current = parent,
        }
    }
    // Parent cycle in the input; detach rather than loop.
    None
}

/// Re-point every message in `output` whose parent was removed to its
/// nearest surviving ancestor from `input`.
///
/// Returns `(position, new parent)` for each repaired message.
pub fn relink_orphans(input: &[Message], output: &mut [Message]) -> Vec<(usize, Option<String>)> {
    let index = parent_index(input);
    let surviving: HashSet<String> = output
        .iter()
        .filter_map(|message| message.id().map(str::to_string))
        .collect();

    let updates: Vec<(usize, Option<String>)> = output
        .iter()
        .enumerate()
        .filter_map(|(pos, message)| {
            let current = message.parent_id()?;
            let expected = nearest_surviving(current, &index, &surviving);
            (expected != Some(current)).then(|| (pos, expected.map(str::to_string)))
        })
        .collect();

    for (pos, parent) in &updates {
        output[*pos].set_parent_id(parent.as_deref());
    }
    updates
}

/// Append records written after `input` was loaded.
///
/// They get lines past the end of `output`, and any whose parent did not
/// survive is re-pointed to its nearest surviving ancestor from `input`.
pub fn append_late_records(input: &[Message], output: &mut Vec<Message>, late: Vec<Message>) {
    let mut next = output.iter().map(|m| m.line + 1).max().unwrap_or(0);
    for mut message in late {
        message.line = next;
        next += 1;
        output.push(message);
    }
    relink_orphans(input, output);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SessionBuilder, user_text};

    fn ids(messages: &[Message]) -> Vec<Option<String>> {
        messages
            .iter()
            .map(|m| m.parent_id().map(str::to_string))
            .collect()
    }

    #[test]
    fn children_of_removed_run_point_to_surviving_ancestor() {
        let input = SessionBuilder::new()
            .user("start")
            .progress()
            .progress()
            .assistant("done")
            .build();
        let mut output = vec![input[0].clone(), input[3].clone()];

        let updates = relink_orphans(&input, &mut output);
        assert_eq!(updates, vec![(1, Some("m0000".to_string()))]);
        assert_eq!(ids(&output), vec![None, Some("m0000".to_string())]);
    }

    #[test]
    fn removing_the_root_detaches_children() {
        let input = SessionBuilder::new().progress().user("hi").build();
        let mut output = vec![input[1].clone()];
        relink_orphans(&input, &mut output);
        assert_eq!(output[0].parent_id(), None);
    }

    #[test]
    fn late_records_follow_and_reattach() {
        let input = SessionBuilder::new()
            .user("start")
            .progress()
            .progress()
            .build();
        let mut output = vec![input[0].clone(), input[2].clone()];
        relink_orphans(&input, &mut output);
        let late = vec![user_text(7, "late", Some("m0001"), "late")];

        append_late_records(&input, &mut output, late);
        assert_eq!(output.len(), 3);
        assert_eq!(output[2].line, 3);
        assert_eq!(output[2].parent_id(), Some("m0000"));
    }

    #[test]
    fn unknown_parents_are_left_alone() {
        let mut input = SessionBuilder::new().user("a").build();
        input[0].set_parent_id(Some("compacted-away"));
        let mut output = input.clone();
        assert!(relink_orphans(&input, &mut output).is_empty());
        assert_eq!(output[0].parent_id(), Some("compacted-away"));
    }
}
