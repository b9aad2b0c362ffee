mod app;
mod install;
mod resolve;
mod store;

pub use app::App;
