/// Configuration macros for zero-repetition config definitions
///
/// `config_struct!` defines a configuration struct with embedded defaults in a
/// single declaration. It generates:
/// - the struct with public fields
/// - the `Default` implementation with the specified values
/// - serde support with `#[serde(default)]`, so partial TOML files work
///
/// ```ignore
/// config_struct! {
///     pub struct DispatchConfig {
///         max_retries: u32 = 3,
///         submission_timeout_ms: u64 = 30_000,
///     }
/// }
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
