use crate::ManagerError;
use pluma_types::PluginDescriptor;

/// Plugin name exempt from validation.
const BUILDER_PLUGIN: &str = "builder";
/// Version string accepted for development builds.
const DEV_VERSION: &str = "dev";

/// Check that a descriptor carries the fields every plugin must declare.
///
/// All problems are reported together.
pub fn validate_descriptor(descriptor: &PluginDescriptor) -> Result<(), ManagerError> {
    if descriptor.name == BUILDER_PLUGIN {
        return Ok(());
    }

    let name = &descriptor.name;
    let mut problems = Vec::new();
    if name.is_empty() {
        problems.push("plugin name cannot be empty".to_string());
    }
    if descriptor.version.is_empty() {
        problems.push(format!("plugin {:?} version cannot be empty", name));
    } else if descriptor.version != DEV_VERSION && !pluma_version::is_valid(&descriptor.version) {
        problems.push(format!(
            "version {:?} {:?} is not a valid semantic version",
            name, descriptor.version
        ));
    }
    if descriptor.description.is_empty() {
        problems.push(format!("plugin {:?} description cannot be empty", name));
    }
    if descriptor.group.is_empty() {
        problems.push(format!("plugin {:?} group cannot be empty", name));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ManagerError::InvalidDescriptor { problems })
    }
}
