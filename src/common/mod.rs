//! Common utilities shared by the library and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Join a base URL and a scenario path without doubling or dropping slashes
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://host/", "/todos"), "https://host/todos");
        assert_eq!(join_url("https://host", "todos/1"), "https://host/todos/1");
        assert_eq!(
            join_url("https://host", "http://other/x"),
            "http://other/x"
        );
    }
}
