pub mod clock;
pub mod controller;
pub mod events;
pub mod ingest;
pub mod mix_worker;
pub mod worker;
