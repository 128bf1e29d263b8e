use gcinfo::util::Address;

#[test]
fn test_signed_offset() {
    let addr = unsafe { Address::from_usize(0x1000) };
    assert_eq!(addr.offset(-0x10), unsafe { Address::from_usize(0xff0) });
    assert_eq!(addr.offset(0x10), addr + 0x10usize);
    assert_eq!(addr.offset(0), addr);
}

#[test]
fn test_get_offset() {
    let base = unsafe { Address::from_usize(0x1000) };
    assert_eq!(base.offset(-24).get_offset(base), -24);
    assert_eq!((base + 8usize) - base, 8);
    assert_eq!((base - 8usize).get_offset(base), -8);
}

#[test]
fn test_from_ref() {
    let words = [0usize; 2];
    let first = Address::from_ref(&words[0]);
    let second = Address::from_ref(&words[1]);
    assert_eq!(second - first, std::mem::size_of::<usize>());
}
