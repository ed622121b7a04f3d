pub mod checker;
pub mod randomize;
pub mod settings;
pub mod traverse;
