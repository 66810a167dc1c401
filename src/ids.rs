use uuid::Uuid;

/// Source of unique identifiers for the `uuid` column
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Time-ordered UUIDv7
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7;

impl IdGenerator for UuidV7 {
    fn generate(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_v7_is_time_ordered() {
        let first = UuidV7.generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = UuidV7.generate();

        assert_eq!(Uuid::parse_str(&first).unwrap().get_version_num(), 7);
        assert!(first < second);
    }
}
