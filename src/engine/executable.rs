use std::borrow::Cow;

use super::run::RunOrigin;
use crate::collections::ApiCollection;

/// Anything the engine can run. Sources reduce to a collection; the engine
/// never sees format-specific structure.
pub trait Executable {
    fn origin(&self) -> RunOrigin;

    fn to_collection(&self) -> Cow<'_, ApiCollection>;
}

impl Executable for ApiCollection {
    fn origin(&self) -> RunOrigin {
        RunOrigin::Collection
    }

    fn to_collection(&self) -> Cow<'_, ApiCollection> {
        Cow::Borrowed(self)
    }
}
