pub mod course;
pub mod instance;
pub mod validation;

pub use course::Course;
pub use instance::{AcademicPeriod, CourseInstance, InstanceId, InvalidSemester, NewInstanceRequest, Semester};
pub use validation::{
    FieldError, ValidationErrors, validate_course, validate_course_key, validate_instance, validate_instance_id,
    validate_semester,
};
