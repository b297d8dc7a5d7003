mod not_found;

pub use not_found::handler as not_found_handler;
