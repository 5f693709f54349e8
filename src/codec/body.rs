//! Message bodies and their type tags.
//!
//! Responses are routed by the 32-bit constructor identifier of their body,
//! never by runtime reflection. Concrete body types implement
//! [`MessageBody`]; types the schema layer can decode also implement
//! [`TypedBody`], which fixes the tag at compile time.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Stable identifier of a body's constructor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(pub u32);

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self)
    }
}

/// Upcast helper so bodies behind `dyn MessageBody` can be downcast.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A decoded message body.
pub trait MessageBody: AsAny + fmt::Debug + Send + Sync + 'static {
    /// Runtime tag of this body.
    fn type_tag(&self) -> TypeTag;
}

/// A body type with a fixed tag and a serde representation.
pub trait TypedBody: MessageBody + Serialize + DeserializeOwned + Sized {
    const TYPE_TAG: TypeTag;
}

/// Shared, type-erased message body.
#[derive(Clone, Debug)]
pub struct Body(Arc<dyn MessageBody>);

impl Body {
    pub fn new<T: MessageBody>(body: T) -> Self {
        Self(Arc::new(body))
    }

    #[inline]
    pub fn type_tag(&self) -> TypeTag {
        self.0.type_tag()
    }

    /// Borrow the body as `T` if that is its concrete type.
    pub fn downcast_ref<T: MessageBody>(&self) -> Option<&T> {
        AsAny::as_any(&*self.0).downcast_ref::<T>()
    }

    /// Whether the body's concrete type is `T`.
    pub fn is<T: MessageBody>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Pong(i64);

    impl MessageBody for Pong {
        fn type_tag(&self) -> TypeTag {
            TypeTag(0x347773c5)
        }
    }

    #[derive(Debug)]
    struct Other;

    impl MessageBody for Other {
        fn type_tag(&self) -> TypeTag {
            TypeTag(1)
        }
    }

    #[test]
    fn test_type_tag_display() {
        assert_eq!(TypeTag(0x347773c5).to_string(), "#347773c5");
        assert_eq!(TypeTag(1).to_string(), "#00000001");
    }

    #[test]
    fn test_body_downcast() {
        let body = Body::new(Pong(5));

        assert_eq!(body.type_tag(), TypeTag(0x347773c5));
        assert_eq!(body.downcast_ref::<Pong>(), Some(&Pong(5)));
        assert!(body.downcast_ref::<Other>().is_none());
        assert!(body.is::<Pong>());
    }

    #[test]
    fn test_body_clone_shares_value() {
        let body = Body::new(Pong(9));
        let clone = body.clone();

        let a = body.downcast_ref::<Pong>().unwrap() as *const Pong;
        let b = clone.downcast_ref::<Pong>().unwrap() as *const Pong;
        assert_eq!(a, b);
    }
}
