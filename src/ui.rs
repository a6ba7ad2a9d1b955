/// Report a fatal CLI error on stderr, outside the log filter.
pub fn error(message: &str) {
    eprintln!("error: {message}");
}
