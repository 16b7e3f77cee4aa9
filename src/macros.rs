//! Convenience macros.

/// Build a [`Fields`](crate::entity::Fields) list from `name => value`
/// pairs, converting each value with `Value::from`.
///
/// # Example
///
/// ```ignore
/// let user = users.create(fields! { "name" => "ada", "age" => 36 })?;
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::entity::Fields::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        vec![$(($name.to_string(), $crate::models::Value::from($value))),+]
    };
}

#[cfg(test)]
mod tests {
    use crate::models::Value;

    #[test]
    fn test_fields_macro() {
        let fields = fields! { "name" => "ada", "age" => 36i64, "email" => None::<String> };
        assert_eq!(
            fields,
            vec![
                ("name".to_string(), Value::from("ada")),
                ("age".to_string(), Value::Integer(36)),
                ("email".to_string(), Value::Null),
            ]
        );
        assert!(fields!().is_empty());
    }
}
