use std::collections::HashMap;
use std::sync::RwLock;

use retailpos_core::UserId;

use crate::Actor;

/// Resolves users into actors.
///
/// Authentication happens elsewhere; by the time an operation runs, the caller
/// only holds a `UserId` and asks the provider who that is.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, user_id: UserId) -> Option<Actor>;
}

impl<T> IdentityProvider for std::sync::Arc<T>
where
    T: IdentityProvider + ?Sized,
{
    fn resolve(&self, user_id: UserId) -> Option<Actor> {
        (**self).resolve(user_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    actors: RwLock<HashMap<UserId, Actor>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, actor: Actor) {
        let mut actors = self.actors.write().unwrap_or_else(|e| e.into_inner());
        actors.insert(actor.user_id, actor);
    }

    pub fn deactivate(&self, user_id: UserId) {
        let mut actors = self.actors.write().unwrap_or_else(|e| e.into_inner());
        if let Some(actor) = actors.get_mut(&user_id) {
            actor.active = false;
        }
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn resolve(&self, user_id: UserId) -> Option<Actor> {
        let actors = self.actors.read().unwrap_or_else(|e| e.into_inner());
        actors.get(&user_id).cloned()
    }
}
