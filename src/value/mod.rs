//! Value objects: the tagged polymorphic container, the shared-object
//! pool, and byte-string/number conversion helpers.

pub mod object;
pub mod shared;
pub mod strconv;

pub use object::{
    compare_strings, decode, equal_strings, make_owned, try_encode, Encoding, Obj, Object,
    ObjectBody, ValueType, EMBSTR_SIZE_LIMIT, LFU_INIT_VAL,
};
pub use shared::{is_shared, refcount, shared_integer, SHARED_INTEGERS, SHARED_REFCOUNT};
