use crate::gcinfo::SlotFlags;
use crate::util::Address;

/// Callback trait of root enumeration. The GC implements this to receive every live reference
/// found in a frame.
///
/// The visitor has no way to stop an enumeration early: a partial root set is never useful to a
/// collector.
pub trait RootVisitor {
    /// Called once per live slot with the address of the slot (not of the object it refers to).
    fn visit_root(&mut self, address: Address, flags: SlotFlags);
}

/// This lets us use closures as RootVisitor.
impl<F: ?Sized + FnMut(Address, SlotFlags)> RootVisitor for F {
    fn visit_root(&mut self, address: Address, flags: SlotFlags) {
        self(address, flags)
    }
}
