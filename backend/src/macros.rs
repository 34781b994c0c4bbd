//! Shared macros for the backend crate.

/// Generate a `fmt::Debug` implementation that redacts sensitive fields.
///
/// Field kinds, given as a keyword before the field name:
///
/// - `show field_name` prints the value normally
/// - `redact field_name` prints `"[REDACTED]"`
/// - `redact_option field_name` prints `Some("[REDACTED]")` or `None`
///
/// ```ignore
/// redacted_debug!(ConnectionInfo {
///     show host,
///     show username,
///     redact_option password,
/// });
/// ```
macro_rules! redacted_debug {
    ($name:ident { $( $kind:ident $field:ident ),* $(,)? }) => {
        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut s = f.debug_struct(stringify!($name));
                $( redacted_debug!(@add_field s, self, $kind, $field); )*
                s.finish_non_exhaustive()
            }
        }
    };
    (@add_field $s:ident, $self:ident, show, $field:ident) => {
        $s.field(stringify!($field), &$self.$field);
    };
    (@add_field $s:ident, $self:ident, redact, $field:ident) => {
        $s.field(stringify!($field), &"[REDACTED]");
    };
    (@add_field $s:ident, $self:ident, redact_option, $field:ident) => {
        $s.field(stringify!($field), &$self.$field.as_ref().map(|_| "[REDACTED]"));
    };
}

#[cfg(test)]
mod tests {
    #[allow(dead_code)]
    struct DumpCredentials {
        pub host: String,
        pub password: String,
        pub sslkey_passphrase: Option<String>,
    }

    redacted_debug!(DumpCredentials {
        show host,
        redact password,
        redact_option sslkey_passphrase,
    });

    #[test]
    fn test_redacted_debug_hides_password() {
        let creds = DumpCredentials {
            host: "db.internal".to_string(),
            password: "s3cr3t-pw".to_string(),
            sslkey_passphrase: Some("key-pass".to_string()),
        };
        let output = format!("{:?}", creds);
        assert!(output.contains("db.internal"));
        assert!(!output.contains("s3cr3t-pw"));
        assert!(!output.contains("key-pass"));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn test_redacted_debug_option_none() {
        let creds = DumpCredentials {
            host: "localhost".to_string(),
            password: "hidden".to_string(),
            sslkey_passphrase: None,
        };
        let output = format!("{:?}", creds);
        assert!(output.contains("None"));
        assert!(!output.contains("hidden"));
    }
}
