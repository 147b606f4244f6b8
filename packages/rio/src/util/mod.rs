pub(crate) mod atomic_take;
