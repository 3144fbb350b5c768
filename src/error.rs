//! Location-carrying error macros over `anyhow`.
//!
//! Fatal conditions in the walker and reindexer are rare and usually mean a
//! filesystem or store invariant broke; prefixing the message with
//! file/function/line makes a one-line log report actionable.

/// Short name of the enclosing function.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        type_name_of(f)
            .rsplit("::")
            .find(|part| *part != "f" && *part != "{{closure}}")
            .unwrap_or("?")
    }};
}

/// `anyhow::bail!` with a `[file:function - line]` prefix.
#[macro_export]
macro_rules! bail_loc {
    ($($arg:tt)*) => {
        anyhow::bail!(
            "[{}:{} - {}] {}",
            file!(),
            $crate::function_name!(),
            line!(),
            format!($($arg)*)
        )
    };
}

/// `anyhow::anyhow!` with a `[file:function - line]` prefix.
#[macro_export]
macro_rules! anyhow_loc {
    ($($arg:tt)*) => {
        anyhow::anyhow!(
            "[{}:{} - {}] {}",
            file!(),
            $crate::function_name!(),
            line!(),
            format!($($arg)*)
        )
    };
}

#[cfg(test)]
mod tests {
    use crate::bail_loc;

    #[test]
    fn messages_carry_location() {
        fn failing() -> anyhow::Result<()> {
            bail_loc!("broke on {}", "purpose")
        }

        let err = failing().unwrap_err().to_string();
        assert!(err.contains("error.rs"), "{err}");
        assert!(err.contains("failing"), "{err}");
        assert!(err.contains("broke on purpose"), "{err}");
    }
}
