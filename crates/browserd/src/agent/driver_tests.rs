// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use super::{parse_action, Action};

#[test]
fn parses_plain_json_actions() -> anyhow::Result<()> {
    let action = parse_action(r#"{"action":"navigate","url":"https://portal.example"}"#)?;
    assert_eq!(action, Action::Navigate { url: "https://portal.example".to_owned() });

    let action = parse_action(r#"{"action":"upload_file","index":3,"path":"/app/tmp/doc.pdf"}"#)?;
    assert_eq!(
        action,
        Action::UploadFile { index: 3, path: PathBuf::from("/app/tmp/doc.pdf") }
    );

    let action = parse_action(r#"{"action":"human_in_the_loop"}"#)?;
    assert_eq!(action, Action::HumanInTheLoop);
    Ok(())
}

#[test]
fn parses_fenced_replies() -> anyhow::Result<()> {
    let reply = "```json\n{\"action\":\"done\",\"summary\":\"submitted\"}\n```";
    let action = parse_action(reply)?;
    assert_eq!(action, Action::Done { summary: "submitted".to_owned() });

    let reply = "```\n{\"action\":\"note\",\"text\":\"waiting on dropdown\"}\n```";
    let action = parse_action(reply)?;
    assert_eq!(action, Action::Note { text: "waiting on dropdown".to_owned() });
    Ok(())
}

#[test]
fn done_summary_defaults_to_empty() -> anyhow::Result<()> {
    let action = parse_action(r#"{"action":"done"}"#)?;
    assert_eq!(action, Action::Done { summary: String::new() });
    Ok(())
}

#[test]
fn rejects_prose_replies() {
    assert!(parse_action("I will now click the button").is_err());
    assert!(parse_action(r#"{"action":"self_destruct"}"#).is_err());
}
