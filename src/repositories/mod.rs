pub mod resource_deploy_repository;

pub use resource_deploy_repository::{
    RepositoryError, RepositoryResult, ResourceDeployRepository, SqliteResourceDeployRepository,
};
