pub mod casting;
pub mod comparison;
pub mod iterator;
pub mod runtime;
