//! kubeassert apply: resolve resource files into mapped documents and dispatch
//! create/update/delete through the dynamic client.

#![forbid(unsafe_code)]

pub mod dispatch;
pub mod resolve;
pub mod template;

pub use dispatch::{apply, apply_many, check_result, effective_namespace, update_field};
pub use resolve::{decode_documents, is_resource_file, resource_files, Resolver};
pub use template::{template_arguments_to_map, TemplateArgument, TemplateArguments, Templater};
