// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display object identification.
//!
//! The display subsystem addresses every object with a 32-bit ID. Each kind
//! gets its own newtype so a plane ID can never be passed where a CRTC ID is
//! expected. Backends assign the values; core treats them as opaque.

use core::fmt;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the raw object ID.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

object_id!(
    /// A display pipeline (CRTC).
    CrtcId
);
object_id!(
    /// A display output (connector).
    ConnectorId
);
object_id!(
    /// A hardware overlay plane.
    PlaneId
);
object_id!(
    /// A registered framebuffer.
    FramebufferId
);
object_id!(
    /// A property exposed by a display object.
    PropertyId
);
object_id!(
    /// A device-local handle to an allocated buffer (a GEM handle).
    BufferHandle
);

/// Which kind of display object a property list belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Display pipeline.
    Crtc,
    /// Display output.
    Connector,
    /// Overlay plane.
    Plane,
}

/// An object ID tagged with its kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    /// A display pipeline.
    Crtc(CrtcId),
    /// A display output.
    Connector(ConnectorId),
    /// An overlay plane.
    Plane(PlaneId),
}

impl ObjectRef {
    /// Returns the kind of the referenced object.
    #[must_use]
    pub const fn kind(self) -> ObjectKind {
        match self {
            Self::Crtc(_) => ObjectKind::Crtc,
            Self::Connector(_) => ObjectKind::Connector,
            Self::Plane(_) => ObjectKind::Plane,
        }
    }

    /// Returns the raw object ID.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Crtc(id) => id.0,
            Self::Connector(id) => id.0,
            Self::Plane(id) => id.0,
        }
    }
}

impl From<CrtcId> for ObjectRef {
    fn from(id: CrtcId) -> Self {
        Self::Crtc(id)
    }
}

impl From<ConnectorId> for ObjectRef {
    fn from(id: ConnectorId) -> Self {
        Self::Connector(id)
    }
}

impl From<PlaneId> for ObjectRef {
    fn from(id: PlaneId) -> Self {
        Self::Plane(id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crtc(id) => write!(f, "crtc {id}"),
            Self::Connector(id) => write!(f, "connector {id}"),
            Self::Plane(id) => write!(f, "plane {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectorId, CrtcId, ObjectKind, ObjectRef, PlaneId};
    use alloc::format;

    #[test]
    fn object_ref_reports_kind_and_raw_id() {
        let plane = ObjectRef::from(PlaneId(31));
        assert_eq!(plane.kind(), ObjectKind::Plane);
        assert_eq!(plane.raw(), 31);

        let connector = ObjectRef::from(ConnectorId(7));
        assert_eq!(connector.kind(), ObjectKind::Connector);
    }

    #[test]
    fn ids_format_with_their_kind() {
        assert_eq!(format!("{:?}", CrtcId(3)), "CrtcId(3)");
        assert_eq!(format!("{}", ObjectRef::Crtc(CrtcId(3))), "crtc 3");
    }
}
