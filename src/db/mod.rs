mod schedule;

pub use schedule::PostgresScheduleStore;
