pub mod mock_channels;
pub mod mock_data_source;

pub use mock_channels::{FailingChannel, RecordingChannel};
pub use mock_data_source::MockDataSource;
