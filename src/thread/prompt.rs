//! Deterministic rendering of a thread into planner-facing text.
//!
//! Every event becomes a `<kind>...</kind>` block, joined in append order.
//! Nothing is summarized or dropped here: squashing happens when results are
//! appended, so rendering stays a pure O(n) projection of the event log.

use serde::Serialize;

use crate::thread::{Event, EventData, Thread};

/// Render the full thread, one block per event, in append order.
pub fn render(thread: &Thread) -> String {
    thread
        .events()
        .iter()
        .map(render_event)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render a single event.
///
/// The opening `email_received` event gets a fixed header layout so the
/// planner sees a stable view of the conversation origin; everything else is
/// a structured dump or the plain-text payload.
pub fn render_event(event: &Event) -> String {
    match &event.data {
        EventData::Email(email) if event.kind == "email_received" => format!(
            "<{kind}>\nFrom: {from}\nTo: {to}\nSubject: {subject}\nBody: {body}\nPrevious Thread: {previous}\n</{kind}>",
            kind = event.kind,
            from = email.from_address,
            to = email.to_address,
            subject = email.subject,
            body = email.body,
            previous = to_yaml(&email.previous_thread),
        ),
        EventData::Text(text) => format!("<{kind}>\n{text}\n</{kind}>", kind = event.kind),
        data => format!(
            "<{kind}>\n{body}\n</{kind}>",
            kind = event.kind,
            body = to_yaml(data),
        ),
    }
}

/// Human-readable, key-ordered dump of a structured payload.
///
/// Values pass through `serde_json::Value` first: its map is ordered, which
/// makes the YAML output deterministic for identical inputs.
pub fn to_yaml<T: Serialize>(data: &T) -> String {
    let value = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
    serde_yaml::to_string(&value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::agent::intent::NextStep;
    use crate::thread::{EmailPayload, Thread};

    fn email_fixture() -> EmailPayload {
        EmailPayload {
            from_address: "ceo@example.com".to_string(),
            to_address: "bot@example.com".to_string(),
            subject: "Deploy please".to_string(),
            body: "Ship the latest build.".to_string(),
            message_id: "<msg-1@example.com>".to_string(),
            previous_thread: Vec::new(),
        }
    }

    #[test]
    fn email_received_renders_fixed_headers() {
        let thread = Thread::from_email(email_fixture());
        let text = render(&thread);
        assert_eq!(
            text,
            "<email_received>\n\
             From: ceo@example.com\n\
             To: bot@example.com\n\
             Subject: Deploy please\n\
             Body: Ship the latest build.\n\
             Previous Thread: []\n\
             </email_received>"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut thread = Thread::from_email(email_fixture());
        thread.append(Event::step(NextStep::SearchIssues {
            query: "fridge".to_string(),
        }));
        thread.append(Event::text("search_issues_result", "nothing found"));

        assert_eq!(render(&thread), render(&thread));
    }

    #[test]
    fn events_render_in_append_order() {
        let mut thread = Thread::from_email(email_fixture());
        thread.append(Event::text("human_response", "first"));
        thread.append(Event::text("human_response", "second"));

        let text = render(&thread);
        let first = text.find("first").expect("first rendered");
        let second = text.find("second").expect("second rendered");
        assert!(first < second);
    }

    #[test]
    fn intent_events_render_as_tagged_yaml_blocks() {
        let mut thread = Thread::from_email(email_fixture());
        thread.append(Event::step(NextStep::SearchIssues {
            query: "fridge".to_string(),
        }));

        let block = render_event(&thread.events()[1]);
        assert!(block.starts_with("<search_issues>\n"));
        assert!(block.ends_with("\n</search_issues>"));
        assert!(block.contains("intent: search_issues"));
        assert!(block.contains("query: fridge"));
    }

    #[test]
    fn text_events_render_verbatim() {
        let event = Event::text("error", "error running list_teams: timeout");
        assert_eq!(
            render_event(&event),
            "<error>\nerror running list_teams: timeout\n</error>"
        );
    }
}
