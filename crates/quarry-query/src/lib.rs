mod criteria;
mod criterion;
mod key;
mod outcome;
mod parse_filter;
mod path;
mod query;
mod range;
mod remap;
mod selection;
mod value;

pub use criteria::{Criteria, CriteriaError, KindConflict};
pub use criterion::Criterion;
pub use key::cache_key;
pub use outcome::{Logic, Reduction};
pub use parse_filter::{FilterParseError, parse_filter};
pub use path::{get_path, set_path};
pub use query::{Query, reduce_query, reduce_query_given};
pub use range::Range;
pub use remap::{Remapped, Shape, Template};
pub use selection::{Selected, Selection, merge_selections, reduce_selection};
pub use value::{Value, ValueKind};
