//! Common definitions that are shared between different parts of the
//! compiler.

/// Interned names: variables, functions, types, labels.
pub type Id = internment::Intern<String>;

/// Make an [Id] out of anything string-like.
pub fn id(name: impl Into<String>) -> Id {
    Id::new(name.into())
}

/// Pointer size of the RV32 target, in bytes.  Frame offsets are multiples
/// of this.
pub const PTR_SIZE: i32 = 4;
