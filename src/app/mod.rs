mod state;

pub use state::App;
