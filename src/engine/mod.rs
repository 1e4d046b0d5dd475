pub mod aggregate;
pub mod jobs;
pub mod matcher;
pub mod options;
pub mod orchestrator;
pub mod result;
pub mod similarity;

pub use aggregate::{DiffAggregator, DiffReport, ResultPage, ResultQuery, Summary};
pub use jobs::{JobRegistry, JobState, JobStatus};
pub use matcher::{Matcher, MatcherState, Progress, ProgressSnapshot};
pub use options::{ColumnMapping, ComparisonOptions, ExportFormat, MatchingAlgorithm};
pub use orchestrator::{RunContext, compare};
pub use result::{ColumnDifference, ComparisonResult, DiffValue, RowStatus};
pub use similarity::similarity;
