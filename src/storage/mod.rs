pub mod template_store;

pub use template_store::{FileTemplateStore, MemoryTemplateStore, TemplateRecord};
