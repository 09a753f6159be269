pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod output;
pub mod page;
pub mod parser;
pub mod query;
pub mod record;
pub mod refresh;
pub mod service;

pub use error::DatasetError;
pub use page::{Page, Pagination};
pub use query::{PageRequest, QuerySpec, Search, Sort, SortDirection};
pub use record::Record;
