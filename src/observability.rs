use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSIONS_CREATED: Counter = Counter::new("majlis.sessions.created");
pub(crate) static SESSIONS_DELETED: Counter = Counter::new("majlis.sessions.deleted");
pub(crate) static SESSIONS_RECATEGORIZED: Counter = Counter::new("majlis.sessions.recategorized");

pub(crate) static STORE_SAVES: Counter = Counter::new("majlis.store.saves");
pub(crate) static STORE_FAILURES: Counter = Counter::new("majlis.store.failures");
pub(crate) static STORE_MIGRATED_RECORDS: Counter = Counter::new("majlis.store.migrated_records");

pub(crate) static STREAM_STARTS: Counter = Counter::new("majlis.stream.starts");
pub(crate) static STREAM_BUSY: Counter = Counter::new("majlis.stream.busy");
pub(crate) static STREAM_DELTAS: Counter = Counter::new("majlis.stream.deltas");
pub(crate) static STREAM_COMMITS: Counter = Counter::new("majlis.stream.commits");
pub(crate) static STREAM_FAILURES: Counter = Counter::new("majlis.stream.failures");
pub(crate) static STREAM_DISCARDS: Counter = Counter::new("majlis.stream.discards");
pub(crate) static STREAM_TTFB: Moments = Moments::new("majlis.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("majlis.stream.duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSIONS_CREATED);
    collector.register_counter(&SESSIONS_DELETED);
    collector.register_counter(&SESSIONS_RECATEGORIZED);

    collector.register_counter(&STORE_SAVES);
    collector.register_counter(&STORE_FAILURES);
    collector.register_counter(&STORE_MIGRATED_RECORDS);

    collector.register_counter(&STREAM_STARTS);
    collector.register_counter(&STREAM_BUSY);
    collector.register_counter(&STREAM_DELTAS);
    collector.register_counter(&STREAM_COMMITS);
    collector.register_counter(&STREAM_FAILURES);
    collector.register_counter(&STREAM_DISCARDS);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);
}
