use chrono::{Local, NaiveDate};

pub mod diary;
pub mod enrichment;
pub mod location;
pub mod recap;
pub mod scheduler;

pub use diary::DiaryService;
pub use enrichment::{Coordinates, Enricher};
pub use location::LocationService;
pub use recap::RecapService;
pub use scheduler::RecapScheduler;

/// Calendar date on the server clock; diaries and recaps are dated locally.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
