//! Utility macros for reducing `FromRef<AppState>` boilerplate.

/// Implements `FromRef<AppState>` for a field type, so axum handlers can
/// extract it directly via `State<T>` instead of always unpacking the full
/// `AppState`.
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
