//! End-to-end tests for the session engine.
//! These run against the scripted backend and need no network access.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use majlis::aggregator::STREAM_FAILURE_MESSAGE;
    use majlis::backend::{ScriptStep, ScriptedBackend};
    use majlis::display::SinkEvent;
    use majlis::store::{CORRUPT_SESSIONS_KEY, MemoryStorage, SESSIONS_KEY};
    use majlis::{
        AggregatorConfig, Category, Error, Message, NoopObserver, RecordingSink, SessionDirectory,
        SessionStore, StreamOutcome, StreamState, StreamingAggregator,
    };

    fn aggregator(backend: ScriptedBackend) -> StreamingAggregator {
        let directory = SessionDirectory::open(SessionStore::in_memory(), NoopObserver);
        StreamingAggregator::new(
            directory.shared(),
            Arc::new(backend),
            AggregatorConfig::default(),
        )
    }

    fn messages(aggregator: &StreamingAggregator) -> Vec<Message> {
        let directory = aggregator.directory();
        let directory = directory.lock().unwrap();
        directory.current().unwrap().messages.clone()
    }

    #[tokio::test]
    async fn test_streamed_reply_is_committed_after_the_question() {
        let aggregator = aggregator(ScriptedBackend::replying(&["اللهم", " صل", " وسلم"]));
        let id = aggregator.directory().lock().unwrap().current_id().unwrap();
        let mut sink = RecordingSink::new();

        let outcome = aggregator
            .send_message(id, "كيف أصلي على النبي؟", &mut sink)
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Committed);
        assert_eq!(sink.updates(), vec!["اللهم", "اللهم صل", "اللهم صل وسلم"]);
        assert_eq!(sink.finalized(), Some("اللهم صل وسلم"));
        assert!(matches!(sink.events[0], SinkEvent::UserMessage(..)));
        assert!(matches!(sink.events[1], SinkEvent::Placeholder(..)));
        assert_eq!(
            messages(&aggregator),
            vec![
                Message::user("كيف أصلي على النبي؟"),
                Message::assistant("اللهم صل وسلم", Vec::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_before_any_text_keeps_only_the_question() {
        let backend = ScriptedBackend::new(vec![ScriptStep::Fail(Error::connection(
            "connection reset",
            None,
        ))]);
        let aggregator = aggregator(backend);
        let id = aggregator.directory().lock().unwrap().current_id().unwrap();
        let mut sink = RecordingSink::new();

        let outcome = aggregator.send_message(id, "سؤال", &mut sink).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Failed);
        assert_eq!(sink.error(), Some(STREAM_FAILURE_MESSAGE));
        assert!(sink.finalized().is_none());
        assert_eq!(messages(&aggregator), vec![Message::user("سؤال")]);
        assert!(!aggregator.is_streaming(id));
    }

    #[tokio::test]
    async fn test_concurrent_send_to_the_same_session_is_busy() {
        let backend = ScriptedBackend::new(vec![
            ScriptStep::Pause(Duration::from_millis(20)),
            ScriptStep::text("answer"),
        ]);
        let aggregator = aggregator(backend);
        let id = aggregator.directory().lock().unwrap().current_id().unwrap();
        let mut first_sink = RecordingSink::new();
        let mut second_sink = RecordingSink::new();

        let (first, second) = futures::join!(
            aggregator.send_message(id, "first", &mut first_sink),
            aggregator.send_message(id, "second", &mut second_sink),
        );

        assert_eq!(first.unwrap(), StreamOutcome::Committed);
        assert!(second.unwrap_err().is_busy());
        assert_eq!(messages(&aggregator).len(), 2);
    }

    #[tokio::test]
    async fn test_question_is_on_disk_while_the_reply_streams() {
        let dir = tempfile::tempdir().unwrap();
        let directory =
            SessionDirectory::open(SessionStore::open_dir(dir.path()).unwrap(), NoopObserver);
        let backend = ScriptedBackend::new(vec![
            ScriptStep::text("The five daily"),
            ScriptStep::Pause(Duration::from_millis(100)),
            ScriptStep::text(" prayers."),
        ]);
        let aggregator = StreamingAggregator::new(
            directory.shared(),
            Arc::new(backend),
            AggregatorConfig::default(),
        );
        let id = aggregator.directory().lock().unwrap().current_id().unwrap();
        let mut sink = RecordingSink::new();

        let (outcome, ()) = futures::join!(
            aggregator.send_message(id, "What are the pillars?", &mut sink),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(aggregator.state(id), StreamState::Streaming);
                let stored = SessionStore::open_dir(dir.path()).unwrap().load().unwrap();
                let session = stored.iter().find(|s| s.id == id).unwrap();
                assert_eq!(session.messages, vec![Message::user("What are the pillars?")]);
            },
        );

        assert_eq!(outcome.unwrap(), StreamOutcome::Committed);
        assert_eq!(aggregator.state(id), StreamState::Idle);
        let stored = SessionStore::open_dir(dir.path()).unwrap().load().unwrap();
        let session = stored.iter().find(|s| s.id == id).unwrap();
        assert_eq!(
            session.messages,
            vec![
                Message::user("What are the pillars?"),
                Message::assistant("The five daily prayers.", Vec::new()),
            ]
        );
    }

    #[test]
    fn test_non_utf8_sessions_file_is_kept_and_a_fresh_session_opens() {
        let dir = tempfile::tempdir().unwrap();
        let blob: &[u8] = b"[{\"id\": 1, \"title\": \"\xfe\xff\", \"messages\": []}]";
        std::fs::write(dir.path().join(SESSIONS_KEY), blob).unwrap();

        let directory =
            SessionDirectory::open(SessionStore::open_dir(dir.path()).unwrap(), NoopObserver);

        assert_eq!(directory.len(), 1);
        assert!(directory.current().unwrap().is_empty());
        let kept = std::fs::read(dir.path().join(CORRUPT_SESSIONS_KEY)).unwrap();
        assert_eq!(kept, blob);
    }

    #[test]
    fn test_deleting_every_session_leaves_one_selected() {
        let mut directory = SessionDirectory::open(SessionStore::in_memory(), NoopObserver);
        let a = directory.create();
        let b = directory.create();
        assert_eq!(directory.current_id(), Some(b));

        directory.delete(b);
        assert_eq!(directory.current_id(), Some(a));

        let ids: Vec<_> = directory
            .list_grouped()
            .iter()
            .flat_map(|group| group.sessions.iter().map(|s| s.id))
            .collect();
        for id in ids {
            directory.delete(id);
        }
        assert_eq!(directory.len(), 1);
        let current = directory.current_id().unwrap();
        assert!(directory.contains(current));
        assert!(directory.current().unwrap().is_empty());
    }

    #[test]
    fn test_records_without_category_load_as_uncategorized() {
        let blob = r#"[{"id": 1700000000000, "title": "الوضوء", "messages": [
            {"sender": "user", "content": "ما نواقض الوضوء؟"},
            {"sender": "ai", "content": "..."}
        ]}]"#;
        let store = SessionStore::new(MemoryStorage::with_value(SESSIONS_KEY, blob));
        let directory = SessionDirectory::open(store, NoopObserver);

        let session = directory.current().unwrap();
        assert_eq!(session.category, Category::Uncategorized);
        assert_eq!(session.title, "الوضوء");
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn test_sessions_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let directory =
                SessionDirectory::open(SessionStore::open_dir(dir.path()).unwrap(), NoopObserver);
            let aggregator = StreamingAggregator::new(
                directory.shared(),
                Arc::new(ScriptedBackend::replying(&["Ibn Ishaq ", "and Ibn Hisham."])),
                AggregatorConfig::default(),
            );
            let id = aggregator.directory().lock().unwrap().current_id().unwrap();
            let mut sink = RecordingSink::new();
            aggregator
                .send_message(id, "Who wrote the earliest biography of the Prophet?", &mut sink)
                .await
                .unwrap();
            aggregator
                .directory()
                .lock()
                .unwrap()
                .recategorize(id, Category::Biography);
            id
        };

        let reopened =
            SessionDirectory::open(SessionStore::open_dir(dir.path()).unwrap(), NoopObserver);
        let session = reopened.get(id).unwrap();
        assert_eq!(session.category, Category::Biography);
        assert_eq!(session.title, "Who wrote the earliest biograp...");
        assert_eq!(
            session.messages[1],
            Message::assistant("Ibn Ishaq and Ibn Hisham.", Vec::new())
        );
        assert_eq!(reopened.current_id(), Some(id));
    }
}
