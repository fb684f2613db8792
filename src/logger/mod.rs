//! Durable activity logging: the JSONL change journal.

pub mod journal;
