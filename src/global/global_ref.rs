//! Serializable references to values living at one place, or at many.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::job::{init_name, FreeRef, PlaceLocalInit, RemoteCall};
use crate::runtime::context::{self, Context};
use crate::types::{GlobalId, Place};

/// A reference to a value registered at its home place.
///
/// The reference itself is plain data and can be captured by jobs shipped
/// anywhere; only the home place can dereference it. A *place-local* handle
/// (see [`GlobalRef::place_local`]) instead names one value per place under
/// a single id, and dereferences to the value of the place it is read at.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct GlobalRef<T> {
    id: GlobalId,
    places: Option<Vec<Place>>,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> GlobalRef<T> {
    /// Registers `value` at the current place.
    pub fn new(value: T) -> Result<Self> {
        context::with_current(|cx| {
            let id = cx.place.next_global_id();
            cx.place.refs().insert(id, Arc::new(value));
            Ok(Self::from_parts(id, None))
        })
    }

    /// Evaluates `init` at every place in `places` under one finish and
    /// registers each result under a shared id.
    ///
    /// The call type must be registered with
    /// [`RuntimeBuilder::register_place_local`](crate::RuntimeBuilder::register_place_local).
    pub fn place_local<C>(places: &[Place], init: C) -> Result<Self>
    where
        C: RemoteCall<Output = T> + Clone,
    {
        context::with_current(|cx| {
            for &place in places {
                cx.place.check_place(place)?;
            }
            let id = cx.place.next_global_id();
            let name = init_name::<C>();
            cx.place.run_finish(cx, |scope: &Context| {
                for &place in places {
                    scope.place.spawn_at(
                        &scope.finish,
                        place,
                        &name,
                        PlaceLocalInit {
                            id,
                            init: init.clone(),
                        },
                        PlaceLocalInit::<C>::into_job,
                    )?;
                }
                Ok(())
            })?;
            Ok(Self::from_parts(id, Some(places.to_vec())))
        })
    }

    /// Returns the referenced value.
    ///
    /// Fails with `BadPlace` anywhere but the home place, or, for a
    /// place-local handle, outside the places it was created for.
    pub fn get(&self) -> Result<Arc<T>> {
        context::with_current(|cx| {
            let here = cx.place.here();
            let reachable = match &self.places {
                Some(places) => places.contains(&here),
                None => here == self.id.home(),
            };
            if !reachable {
                return Err(Error::bad_place(i64::from(here.id()))
                    .with_message(format!("{self:?} cannot be dereferenced at {here}"))
                    .with_place(here));
            }
            cx.place.refs().get::<T>(self.id).ok_or_else(|| {
                Error::internal(format!("{self:?} is not registered at {here}")).with_place(here)
            })
        })
    }
}

impl<T> GlobalRef<T> {
    const fn from_parts(id: GlobalId, places: Option<Vec<Place>>) -> Self {
        Self {
            id,
            places,
            _marker: PhantomData,
        }
    }

    /// Place the reference was created at.
    #[must_use]
    pub const fn home(&self) -> Place {
        self.id.home()
    }

    /// Identifier shared by every copy of the reference.
    #[must_use]
    pub const fn id(&self) -> GlobalId {
        self.id
    }

    /// True for a handle created by [`GlobalRef::place_local`].
    #[must_use]
    pub const fn is_place_local(&self) -> bool {
        self.places.is_some()
    }

    /// Unregisters the value at home, or at every place of a place-local
    /// handle. Remote releases are fire and forget.
    pub fn free(&self) -> Result<()> {
        context::with_current(|cx| {
            let here = cx.place.here();
            let home = [self.id.home()];
            let targets: &[Place] = self.places.as_deref().unwrap_or(&home);
            for &place in targets {
                if place == here {
                    cx.place.refs().remove(self.id);
                } else {
                    crate::constructs::uncounted_async_at(place, FreeRef { id: self.id })?;
                }
            }
            Ok(())
        })
    }
}

impl<T> Clone for GlobalRef<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.id, self.places.clone())
    }
}

impl<T> fmt::Debug for GlobalRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.places.is_some() {
            write!(f, "GlobalRef({}, place-local)", self.id)
        } else {
            write!(f, "GlobalRef({})", self.id)
        }
    }
}
