//! Authentication state trait and macro.

use crate::jwt::TokenCodec;

/// Trait for router state types whose routes sit behind the route guard.
pub trait HasAuthState {
    fn codec(&self) -> &TokenCodec;
}

/// Implement [`HasAuthState`] for a state struct with a
/// `codec: Arc<TokenCodec>` field.
#[macro_export]
macro_rules! impl_has_auth_state {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthState for $state_type {
            fn codec(&self) -> &$crate::jwt::TokenCodec {
                &self.codec
            }
        }
    };
}
