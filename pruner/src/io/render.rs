//! Text rendering for injected recovery messages and checkpoint markdown.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::team::{TaskInfo, TeamSnapshot};
use crate::io::checkpoint::Checkpoint;

const RECOVERY_TEMPLATE: &str = include_str!("templates/recovery.md");
const CHECKPOINT_TEMPLATE: &str = include_str!("templates/checkpoint.md");

/// Characters of a task description shown in checkpoint markdown.
const DESCRIPTION_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct TaskView<'a> {
    icon: &'static str,
    subject: &'a str,
    status: &'a str,
    owner: &'a str,
    description: String,
}

impl<'a> TaskView<'a> {
    fn from_task(task: &'a TaskInfo) -> Self {
        let icon = match task.status.as_str() {
            "completed" => "x",
            "in_progress" => "/",
            _ => " ",
        };
        let description = match task.description.char_indices().nth(DESCRIPTION_CHARS) {
            Some((end, _)) => task.description[..end].to_string(),
            None => task.description.clone(),
        };
        Self {
            icon,
            subject: &task.subject,
            status: &task.status,
            owner: &task.owner,
            description,
        }
    }
}

fn display_name(snapshot: &TeamSnapshot) -> &str {
    if snapshot.team_name.is_empty() {
        "unnamed"
    } else {
        &snapshot.team_name
    }
}

struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("recovery", RECOVERY_TEMPLATE)
            .expect("recovery template should be valid");
        env.add_template("checkpoint", CHECKPOINT_TEMPLATE)
            .expect("checkpoint template should be valid");
        Self { env }
    }

    fn render_recovery(&self, snapshot: &TeamSnapshot) -> Result<String> {
        let template = self.env.get_template("recovery")?;
        let rendered = template.render(context! {
            team_name => display_name(snapshot),
            teammates => &snapshot.teammates,
            tasks => &snapshot.tasks,
            lead_summary => (!snapshot.lead_summary.is_empty()).then_some(&snapshot.lead_summary),
        })?;
        Ok(rendered.trim().to_string())
    }

    fn render_checkpoint(&self, checkpoint: &Checkpoint) -> Result<String> {
        let snapshot = &checkpoint.snapshot;
        let tasks: Vec<TaskView<'_>> = snapshot.tasks.iter().map(TaskView::from_task).collect();
        let template = self.env.get_template("checkpoint")?;
        let rendered = template.render(context! {
            team_name => display_name(snapshot),
            written_at => &checkpoint.written_at,
            session => &checkpoint.session,
            teammates => &snapshot.teammates,
            tasks => tasks,
            history => &snapshot.history,
            lead_summary => (!snapshot.lead_summary.is_empty()).then_some(&snapshot.lead_summary),
            message_count => snapshot.message_count,
        })?;
        let mut out = rendered.trim().to_string();
        out.push('\n');
        Ok(out)
    }
}

/// Team state as plain text for the injected snapshot pair.
pub fn recovery_text(snapshot: &TeamSnapshot) -> Result<String> {
    TemplateEngine::new().render_recovery(snapshot)
}

/// Checkpoint as markdown for manual recovery.
pub fn checkpoint_markdown(checkpoint: &Checkpoint) -> Result<String> {
    TemplateEngine::new().render_checkpoint(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::team::extract_team_state;
    use crate::test_support::scenario_session;

    #[test]
    fn recovery_lists_teammates_and_tasks() {
        let snapshot = extract_team_state(&scenario_session());
        let text = recovery_text(&snapshot).expect("render");
        assert!(text.starts_with("Active agent team: release\n\nTeammates:\n"));
        assert!(text.contains("  - builder (agent_id: agent-1), compiles artifacts [running]"));
        assert!(text.contains("  - [IN_PROGRESS] Compile (owner: builder)"));
        assert!(text.contains("  - [PENDING] Test (owner: tester)"));
    }

    #[test]
    fn unnamed_team_without_members_renders_one_line() {
        let text = recovery_text(&TeamSnapshot::default()).expect("render");
        assert_eq!(text, "Active agent team: unnamed");
    }

    #[test]
    fn checkpoint_markdown_has_sections() {
        let checkpoint = Checkpoint::new("session.jsonl", extract_team_state(&scenario_session()));
        let markdown = checkpoint_markdown(&checkpoint).expect("render");
        assert!(markdown.starts_with("# Agent Team Checkpoint: release\n"));
        assert!(markdown.contains("## Teammates\n- **builder** (`agent-1`): compiles artifacts (running)"));
        assert!(markdown.contains("- [/] Compile @builder"));
        assert!(markdown.contains("## Coordination History\n- line 1 `TeamCreate`:"));
        assert!(markdown.ends_with("_Extracted from 5 team-related messages_\n"));
    }
}
