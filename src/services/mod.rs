pub mod traceability;
