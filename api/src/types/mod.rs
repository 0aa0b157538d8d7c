pub mod my_entity;

pub use my_entity::Entity as MyEntities;
pub use my_entity::Model as MyEntity;

use uuid::Uuid;

/// Table and column identifiers as they exist in PostgreSQL (quoted, case-sensitive).
pub const TABLE_NAME: &str = "MyEntities";
pub const ID_COLUMN: &str = "Id";
pub const NAME_COLUMN: &str = "Name";

/// Builds `count` fresh entities. Entity `i` is named `"Entity {i}"` and gets a
/// random UUID v4 as its id.
pub fn generate_entities(count: usize) -> Vec<MyEntity> {
    (0..count)
        .map(|i| MyEntity {
            id: Uuid::new_v4().to_string(),
            name: entity_name(i),
        })
        .collect()
}

pub fn entity_name(index: usize) -> String {
    format!("Entity {}", index)
}
