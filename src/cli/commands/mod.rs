mod ask;
mod config;
mod doc;
mod init;
mod status;
mod upload;
mod worker;

pub use ask::AskArgs;
pub use config::ConfigCommand;
pub use doc::DocCommand;
pub use upload::UploadArgs;
pub use worker::WorkerArgs;

pub use ask::handle_ask;
pub use config::handle_config;
pub use doc::handle_doc;
pub use init::handle_init;
pub use status::handle_status;
pub use upload::handle_upload;
pub use worker::{handle_worker, shutdown_signal};
