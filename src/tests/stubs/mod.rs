pub mod fake_registers;
pub mod fake_services;
