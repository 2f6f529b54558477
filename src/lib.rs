pub mod appconfig;
pub mod bb_folders;
pub mod block;
pub mod cli;
pub mod config;
pub mod config_cmd;
pub mod context;
pub mod emulator;
pub mod envsync;
pub mod fn_start;
pub mod installer;
pub mod live;
pub mod package_manager;
pub mod pipeline;
pub mod start_cmd;
pub mod supervisor;
pub mod util;
