use chrono::{DateTime, Utc};

/// Source of record identifiers. Passed explicitly into the collection
/// layer so tests can substitute a deterministic generator.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// Canonical-form type-4 UUIDs.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Wall clock, UTC, millisecond precision or better.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
