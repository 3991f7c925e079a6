//! Detail-note generation for events found in event-list notes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::{extract_from_file, ExtractedEvent};
use crate::model::{prompt, ModelClient, Sleeper, ThreadSleeper};
use crate::vault::link::link_annotation;
use crate::vault::{link_back, LinkError, NoteRecord, Vault};

use super::StepError;

/// What happened to one extracted event.
#[derive(Debug)]
pub enum DetailStatus {
    /// Detail note written and linked from the source note.
    Linked(NoteRecord),
    /// Detail note written, but the source note could not be patched.
    Unlinked(NoteRecord, LinkError),
    /// Generation or saving failed; nothing was written.
    Failed(StepError),
}

/// Progress notifications emitted while processing.
#[derive(Debug)]
pub enum Progress<'a> {
    FileStarted {
        index: usize,
        total: usize,
        path: &'a Path,
        events: usize,
    },
    EventFinished {
        index: usize,
        total: usize,
        event: &'a ExtractedEvent,
        status: &'a DetailStatus,
    },
}

/// Counters for a detail run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetailReport {
    pub files: usize,
    /// Files that could not be read.
    pub unreadable: usize,
    pub events: usize,
    pub generated: usize,
    pub link_failures: usize,
    pub failures: usize,
    pub budget_exhausted: bool,
}

impl DetailReport {
    fn absorb(&mut self, other: &DetailReport) {
        self.files += other.files;
        self.unreadable += other.unreadable;
        self.events += other.events;
        self.generated += other.generated;
        self.link_failures += other.link_failures;
        self.failures += other.failures;
        self.budget_exhausted |= other.budget_exhausted;
    }
}

/// Walks event-list notes and writes a linked detail note per event.
pub struct DetailGenerator<'a> {
    client: &'a mut ModelClient,
    vault: &'a Vault,
    pacer: Box<dyn Sleeper>,
    pause: Duration,
    streaming: bool,
}

impl<'a> DetailGenerator<'a> {
    pub fn new(client: &'a mut ModelClient, vault: &'a Vault) -> Self {
        Self {
            client,
            vault,
            pacer: Box::new(ThreadSleeper),
            pause: Duration::from_secs(1),
            streaming: true,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Sleeper>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Processes every file in order, pausing between files.
    pub fn process_all<F>(&mut self, files: &[PathBuf], mut on_progress: F) -> DetailReport
    where
        F: FnMut(Progress<'_>),
    {
        let mut report = DetailReport::default();
        for (index, path) in files.iter().enumerate() {
            let file_report = self.process_file_at(path, index, files.len(), &mut on_progress);
            report.absorb(&file_report);

            if report.budget_exhausted {
                tracing::warn!("Token budget reached, stopping detail generation");
                break;
            }
            if index + 1 < files.len() {
                self.pacer.sleep(self.pause);
            }
        }
        report
    }

    /// Processes the events of a single event-list note.
    pub fn process_file<F>(&mut self, path: &Path, mut on_progress: F) -> DetailReport
    where
        F: FnMut(Progress<'_>),
    {
        self.process_file_at(path, 0, 1, &mut on_progress)
    }

    fn process_file_at<F>(
        &mut self,
        path: &Path,
        file_index: usize,
        file_total: usize,
        on_progress: &mut F,
    ) -> DetailReport
    where
        F: FnMut(Progress<'_>),
    {
        let mut report = DetailReport {
            files: 1,
            ..DetailReport::default()
        };

        let events = match extract_from_file(path) {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to read {}: {e}", path.display());
                report.unreadable = 1;
                return report;
            }
        };
        on_progress(Progress::FileStarted {
            index: file_index,
            total: file_total,
            path,
            events: events.len(),
        });
        tracing::info!("Extracted {} events from {}", events.len(), path.display());
        report.events = events.len();

        // Each inserted link moves the byte offsets of later markers.
        let mut shift = 0;
        for (index, extracted) in events.iter().enumerate() {
            let event = ExtractedEvent {
                locus: extracted.locus.shifted(shift),
                ..extracted.clone()
            };
            let status = self.detail_for(&event);

            match &status {
                DetailStatus::Linked(record) => {
                    report.generated += 1;
                    shift += link_annotation(&record.link_path).len();
                }
                DetailStatus::Unlinked(..) => {
                    report.generated += 1;
                    report.link_failures += 1;
                }
                DetailStatus::Failed(err) if err.is_budget_exhausted() => {
                    report.budget_exhausted = true;
                }
                DetailStatus::Failed(_) => report.failures += 1,
            }
            on_progress(Progress::EventFinished {
                index,
                total: events.len(),
                event: &event,
                status: &status,
            });

            if report.budget_exhausted {
                break;
            }
            if index + 1 < events.len() {
                self.pacer.sleep(self.pause);
            }
        }
        report
    }

    fn detail_for(&mut self, event: &ExtractedEvent) -> DetailStatus {
        tracing::info!("Generating details for '{}'", event.name);
        let record = match self.generate(event) {
            Ok(record) => record,
            Err(err) => {
                if !err.is_budget_exhausted() {
                    tracing::error!("Details for '{}' failed: {err}", event.name);
                }
                return DetailStatus::Failed(err);
            }
        };

        match link_back(event, &record.link_path) {
            Ok(()) => DetailStatus::Linked(record),
            Err(err) => DetailStatus::Unlinked(record, err),
        }
    }

    fn generate(&mut self, event: &ExtractedEvent) -> Result<NoteRecord, StepError> {
        let max_tokens = self.client.settings().max_tokens_per_request;
        let result = self.client.call(
            &prompt::detail_prompt(event),
            Some(prompt::detail_system_prompt()),
            Some(max_tokens),
            self.streaming,
        )?;
        Ok(self.vault.save_detail(event, &result.content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract, EventTiming};
    use crate::model::TransportError;
    use crate::pipeline::test_support::{client, CountingSleeper, FakeTransport};
    use tempfile::tempdir;

    const DETAIL_JSON: &str = r#"{"title": "t", "overview": "概述内容"}"#;

    fn setup(list: &str) -> (Vault, PathBuf, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path(), "Events", "AIdetails").unwrap();
        let path = vault.event_dir().join("list.md");
        std::fs::write(&path, list).unwrap();
        (vault, path, dir)
    }

    #[test]
    fn test_multiple_markers_all_linked() {
        let list = "{甲午战争（1894年）}\n{戊戌变法（1898年）}\n{辛亥革命（1911年）}\n";
        let (vault, path, _dir) = setup(list);
        let transport = FakeTransport::default();
        for _ in 0..3 {
            transport.reply(DETAIL_JSON, 20);
        }
        let mut model = client(&transport, 3, 5000);
        let pacer = CountingSleeper::default();

        let report = DetailGenerator::new(&mut model, &vault)
            .with_pacer(Box::new(pacer.clone()))
            .process_file(&path, |_| {});

        assert_eq!(report.events, 3);
        assert_eq!(report.generated, 3);
        assert_eq!(report.link_failures, 0);
        assert_eq!(pacer.0.borrow().len(), 2);

        let updated = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            updated,
            "{甲午战争（1894年）} [[AIdetails/甲午战争1894年_详情.md|详情]]\n\
             {戊戌变法（1898年）} [[AIdetails/戊戌变法1898年_详情.md|详情]]\n\
             {辛亥革命（1911年）} [[AIdetails/辛亥革命1911年_详情.md|详情]]\n"
        );

        // Linking keeps the markers extractable.
        let names: Vec<_> = extract(&updated).into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["甲午战争（1894年）", "戊戌变法（1898年）", "辛亥革命（1911年）"]);
    }

    #[test]
    fn test_list_items_stay_extractable_after_linking() {
        let list = "- 洋务运动史 (1861-1894)\n- 洋务运动 (1861-1894)\n";
        let (vault, path, _dir) = setup(list);
        let transport = FakeTransport::default();
        transport.reply(DETAIL_JSON, 1);
        transport.reply(DETAIL_JSON, 1);
        let mut model = client(&transport, 3, 5000);

        let report = DetailGenerator::new(&mut model, &vault)
            .with_pacer(Box::new(CountingSleeper::default()))
            .process_file(&path, |_| {});
        assert_eq!(report.generated, 2);
        assert_eq!(report.link_failures, 0);

        let updated = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            updated,
            "- 洋务运动史 (1861-1894) [[AIdetails/洋务运动史_详情.md|详情]]\n\
             - 洋务运动 (1861-1894) [[AIdetails/洋务运动_详情.md|详情]]\n"
        );

        let events = extract(&updated);
        let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["洋务运动史", "洋务运动"]);
        let span = EventTiming::Range {
            start: 1861,
            end: 1894,
        };
        assert!(events.iter().all(|e| e.timing == span));
    }

    #[test]
    fn test_detail_prompt_uses_canonical_name() {
        let (vault, path, _dir) = setup("{甲午战争（1894年）}");
        let transport = FakeTransport::default();
        transport.reply(DETAIL_JSON, 1);
        let mut model = client(&transport, 3, 5000);

        DetailGenerator::new(&mut model, &vault)
            .with_pacer(Box::new(CountingSleeper::default()))
            .process_file(&path, |_| {});

        let requests = transport.requests.borrow();
        assert!(requests[0].user_prompt.contains("甲午战争"));
        assert!(requests[0].user_prompt.contains("1894"));
        assert_eq!(requests[0].max_tokens, 1000);
    }

    #[test]
    fn test_failed_event_is_skipped() {
        let (vault, path, _dir) = setup("- 洋务运动 (1861-1894)\n- 百日维新 (1898)\n");
        let transport = FakeTransport::default();
        transport.fail(TransportError::Timeout("timed out".into()));
        transport.reply(DETAIL_JSON, 1);
        let mut model = client(&transport, 1, 5000);

        let mut statuses = Vec::new();
        let report = DetailGenerator::new(&mut model, &vault)
            .with_pacer(Box::new(CountingSleeper::default()))
            .process_file(&path, |p| {
                if let Progress::EventFinished { status, .. } = p {
                    statuses.push(matches!(status, DetailStatus::Linked(_)));
                }
            });

        assert_eq!(statuses, [false, true]);
        assert_eq!(report.failures, 1);
        assert_eq!(report.generated, 1);
        let updated = std::fs::read_to_string(&path).unwrap();
        assert!(updated.contains("- 百日维新 (1898) [[AIdetails/百日维新_详情.md|详情]]"));
        assert!(!updated.contains("洋务运动 (1861-1894) [["));
    }

    #[test]
    fn test_budget_stops_all_files() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path(), "Events", "AIdetails").unwrap();
        let first = vault.event_dir().join("a.md");
        let second = vault.event_dir().join("b.md");
        std::fs::write(&first, "{甲（1900年）}\n{乙（1901年）}\n").unwrap();
        std::fs::write(&second, "{丙（1902年）}\n").unwrap();

        let transport = FakeTransport::default();
        transport.reply(DETAIL_JSON, 100);
        let mut model = client(&transport, 3, 100);

        let report = DetailGenerator::new(&mut model, &vault)
            .with_pacer(Box::new(CountingSleeper::default()))
            .process_all(&[first, second.clone()], |_| {});

        assert!(report.budget_exhausted);
        assert_eq!(report.files, 1);
        assert_eq!(report.generated, 1);
        assert_eq!(transport.requests.borrow().len(), 1);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "{丙（1902年）}\n");
    }

    #[test]
    fn test_unreadable_file_counted() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path(), "Events", "AIdetails").unwrap();
        let transport = FakeTransport::default();
        let mut model = client(&transport, 3, 5000);

        let report = DetailGenerator::new(&mut model, &vault)
            .process_all(&[dir.path().join("missing.md")], |_| {});

        assert_eq!(report.files, 1);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.events, 0);
    }

    #[test]
    fn test_edited_source_leaves_note_unlinked() {
        let (vault, path, _dir) = setup("{五四运动（1919年）}");
        let transport = FakeTransport::default();
        transport.reply(DETAIL_JSON, 1);
        let mut model = client(&transport, 3, 5000);

        let mut generator = DetailGenerator::new(&mut model, &vault)
            .with_pacer(Box::new(CountingSleeper::default()));
        let event = {
            let mut e = extract("{五四运动（1919年）}").remove(0);
            e.source_path = path.clone();
            e
        };
        std::fs::write(&path, "改写").unwrap();

        match generator.detail_for(&event) {
            DetailStatus::Unlinked(record, LinkError::SourceChanged { .. }) => {
                assert!(record.file_path.exists());
            }
            other => panic!("Expected Unlinked, got: {other:?}"),
        }
    }
}
