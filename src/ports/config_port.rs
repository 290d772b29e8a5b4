//! Configuration access port trait.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    /// Keys present in `section`, sorted.
    fn keys(&self, section: &str) -> Vec<String>;
}
