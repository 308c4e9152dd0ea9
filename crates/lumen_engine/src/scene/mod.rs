//! Scene layer
//!
//! Game objects sit on top of the entity store and give each entity a list
//! of scripts with a start/update/destroy lifecycle. Destroying a game object
//! takes its whole subtree with it, swept at a safe point in the frame.

mod game_object;
#[allow(clippy::module_inception)]
mod scene;
mod script;

pub use game_object::GameObject;
pub use scene::Scene;
pub use script::{Script, ScriptContext, ScriptKey};
