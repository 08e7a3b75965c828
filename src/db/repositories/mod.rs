pub mod flushes;
