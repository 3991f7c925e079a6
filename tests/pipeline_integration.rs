//! Integration tests for the collection and detail pipelines
//!
//! These tests drive the public pipeline API end to end against a scripted
//! model transport and a vault in a temporary directory.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use chronicle_vault::extract::extract;
use chronicle_vault::model::{
    ChatReply, ChatRequest, ClientSettings, ModelClient, Sleeper, Transport, TransportError,
};
use chronicle_vault::pipeline::{Collector, DetailGenerator};
use chronicle_vault::timeline::{EventRequest, YearRange};
use chronicle_vault::vault::Vault;
use tempfile::tempdir;

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Clone, Default)]
struct ScriptedModel {
    replies: Rc<RefCell<VecDeque<Result<ChatReply, TransportError>>>>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedModel {
    fn reply(&self, content: &str, tokens_used: u64) -> &Self {
        self.replies.borrow_mut().push_back(Ok(ChatReply {
            content: content.to_string(),
            tokens_used,
        }));
        self
    }
}

impl Transport for ScriptedModel {
    fn send(&self, request: &ChatRequest) -> Result<ChatReply, TransportError> {
        self.prompts.borrow_mut().push(request.user_prompt.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".to_string())))
    }
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

fn client(model: &ScriptedModel, max_tokens_total: u64) -> ModelClient {
    ModelClient::new(
        Box::new(model.clone()),
        ClientSettings {
            model: "test-model".to_string(),
            max_tokens_per_request: 1000,
            max_tokens_total,
            retry_attempts: 2,
        },
    )
    .with_sleeper(Box::new(NoSleep))
}

fn open_vault(root: &Path) -> Vault {
    Vault::open(root, "Events", "AIdetails").expect("Failed to open vault")
}

const DETAIL_REPLY: &str = r#"```json
{
  "title": "甲午战争",
  "happened": "1894年",
  "people": ["李鸿章", "伊藤博文"],
  "location": "黄海",
  "tags": ["战争", "清朝"],
  "overview": "中日之间的战争。",
  "background": "朝鲜问题。",
  "course": "丰岛海战、黄海海战。",
  "outcome": "签订《马关条约》。",
  "significance": "加深了民族危机。"
}
```"#;

// =============================================================================
// Collection
// =============================================================================

#[test]
fn test_collect_then_details_round_trip() {
    let dir = tempdir().expect("Failed to create temp directory");
    let vault = open_vault(dir.path());
    let model = ScriptedModel::default();
    model
        .reply("清末重大事件：\n{甲午战争（1894年）}\n{戊戌变法（1898年）}\n", 50)
        .reply(DETAIL_REPLY, 40)
        .reply(r#"{"title": "戊戌变法", "overview": "百日维新。"}"#, 30);
    let mut client = client(&model, 5000);

    let request = EventRequest::new("清末", YearRange::parse("1894-1898"));
    let collected = Collector::new(&mut client, &vault)
        .with_pacer(Box::new(NoSleep))
        .run(&request, 1, |_| {});
    assert_eq!(collected.saved.len(), 1);
    let list_path = collected.saved[0].file_path.clone();
    assert_eq!(list_path, vault.event_dir().join("清末_1894-1898.md"));

    let files = vault.event_list_files().expect("Failed to list files");
    assert_eq!(files, vec![list_path.clone()]);

    let report = DetailGenerator::new(&mut client, &vault)
        .with_pacer(Box::new(NoSleep))
        .process_all(&files, |_| {});
    assert_eq!(report.files, 1);
    assert_eq!(report.events, 2);
    assert_eq!(report.generated, 2);
    assert_eq!(report.link_failures, 0);
    assert_eq!(client.state().call_count, 3);
    assert_eq!(client.state().total_tokens, 120);

    // Each marker keeps its text and gains exactly one link.
    let list = std::fs::read_to_string(&list_path).unwrap();
    assert_eq!(list.matches("[[AIdetails/甲午战争1894年_详情.md|详情]]").count(), 1);
    assert_eq!(list.matches("[[AIdetails/戊戌变法1898年_详情.md|详情]]").count(), 1);
    assert!(list.contains("{甲午战争（1894年）} [[AIdetails/甲午战争1894年_详情.md|详情]]"));

    let names: Vec<_> = extract(&list).into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["甲午战争（1894年）", "戊戌变法（1898年）"]);

    let detail = std::fs::read_to_string(vault.detail_dir().join("甲午战争1894年_详情.md")).unwrap();
    assert!(detail.starts_with("---\n"));
    assert!(detail.contains("李鸿章"));
    assert!(detail.contains("## 概述"));
    assert!(detail.contains("加深了民族危机。"));
    assert!(detail.contains("[[Events/清末_1894-1898.md|甲午战争（1894年）]]"));

    let prompts = model.prompts.borrow();
    assert!(prompts[0].contains("1894-1898"));
    assert!(prompts[1].contains("甲午战争"));
}

#[test]
fn test_collect_twice_does_not_overwrite() {
    let dir = tempdir().expect("Failed to create temp directory");
    let vault = open_vault(dir.path());
    let model = ScriptedModel::default();
    model.reply("first run", 1).reply("second run", 1);
    let mut client = client(&model, 5000);

    let request = EventRequest::new("洋务运动", YearRange::parse("1861-1861"));
    for _ in 0..2 {
        Collector::new(&mut client, &vault)
            .with_pacer(Box::new(NoSleep))
            .run(&request, 3, |_| {});
    }

    let first = std::fs::read_to_string(vault.event_dir().join("洋务运动_1861-1861.md")).unwrap();
    let second = std::fs::read_to_string(vault.event_dir().join("洋务运动_1861-1861_1.md")).unwrap();
    assert!(first.contains("first run"));
    assert!(second.contains("second run"));
}

#[test]
fn test_budget_exhaustion_skips_remaining_windows() {
    let dir = tempdir().expect("Failed to create temp directory");
    let vault = open_vault(dir.path());
    let model = ScriptedModel::default();
    model.reply("a", 300).reply("b", 300).reply("c", 300);
    let mut client = client(&model, 500);

    let request = EventRequest::new("二十世纪", YearRange::parse("1900-1999"));
    let report = Collector::new(&mut client, &vault)
        .with_pacer(Box::new(NoSleep))
        .run(&request, 4, |_| {});

    assert_eq!(report.saved.len(), 2);
    assert!(report.budget_exhausted);
    assert_eq!(report.skipped, 2);
    assert_eq!(model.prompts.borrow().len(), 2);
}

// =============================================================================
// Details
// =============================================================================

#[test]
fn test_list_item_notes_are_linked() {
    let dir = tempdir().expect("Failed to create temp directory");
    let vault = open_vault(dir.path());
    let list_path = vault.event_dir().join("近代.md");
    std::fs::write(&list_path, "# 近代\n\n- 洋务运动 (1861-1894)\n- 百日维新（1898年）\n").unwrap();

    let model = ScriptedModel::default();
    model
        .reply("洋务运动是一场自强运动。", 10)
        .reply(r#"{"title": "百日维新", "people": "康有为、梁启超"}"#, 10);
    let mut client = client(&model, 5000);

    let report = DetailGenerator::new(&mut client, &vault)
        .with_pacer(Box::new(NoSleep))
        .process_file(&list_path, |_| {});
    assert_eq!(report.generated, 2);

    let list = std::fs::read_to_string(&list_path).unwrap();
    assert!(list.contains("- 洋务运动 (1861-1894) [[AIdetails/洋务运动_详情.md|详情]]\n"));
    assert!(list.contains("- 百日维新（1898年） [[AIdetails/百日维新_详情.md|详情]]\n"));

    // Unstructured answers are kept verbatim.
    let raw = std::fs::read_to_string(vault.detail_dir().join("洋务运动_详情.md")).unwrap();
    assert!(raw.contains("洋务运动是一场自强运动。"));

    let prompts = model.prompts.borrow();
    assert!(prompts[0].contains("1861-1894"));
    assert!(prompts[1].contains("1898"));
}

#[test]
fn test_details_continue_after_failed_event() {
    let dir = tempdir().expect("Failed to create temp directory");
    let vault = open_vault(dir.path());
    let list_path = vault.event_dir().join("list.md");
    std::fs::write(&list_path, "{甲（1900年）}\n{乙（1901年）}\n").unwrap();

    let model = ScriptedModel::default();
    model
        .replies
        .borrow_mut()
        .extend([
            Err(TransportError::Status {
                status: 500,
                body: "down".to_string(),
            }),
            Err(TransportError::Status {
                status: 500,
                body: "down".to_string(),
            }),
        ]);
    model.reply(r#"{"title": "乙"}"#, 5);
    let mut client = client(&model, 5000);

    let report = DetailGenerator::new(&mut client, &vault)
        .with_pacer(Box::new(NoSleep))
        .process_file(&list_path, |_| {});

    assert_eq!(report.failures, 1);
    assert_eq!(report.generated, 1);
    // Failed attempts that got a response still count as calls.
    assert_eq!(client.state().call_count, 3);

    let list = std::fs::read_to_string(&list_path).unwrap();
    assert_eq!(list, "{甲（1900年）}\n{乙（1901年）} [[AIdetails/乙1901年_详情.md|详情]]\n");
    assert!(!vault.detail_dir().join("甲1900年_详情.md").exists());
}
