pub mod course_service;
pub mod instance_service;
pub mod normalize;

pub use course_service::CourseService;
pub use instance_service::InstanceService;
