//! Convenience macros for building parameter maps.

/// Build a [`NamedParams`](crate::models::NamedParams) map.
///
/// Values go through `QueryParam::from`, so plain Rust values work directly.
///
/// # Example
///
/// ```ignore
/// let params = named_params! {
///     "name" => "Ada",
///     "level" => 3,
///     "retired_at" => None::<i64>,
/// };
/// db.execute("UPDATE players SET level = :level WHERE name = :name", Some(&params)).await?;
/// ```
#[macro_export]
macro_rules! named_params {
    () => {
        $crate::models::NamedParams::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::models::NamedParams::new();
        $(
            params.insert(
                ::std::string::String::from($name),
                $crate::models::QueryParam::from($value),
            );
        )+
        params
    }};
}

pub use named_params;
