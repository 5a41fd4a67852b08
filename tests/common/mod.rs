#![allow(dead_code)]

pub mod mock_collaborators;
pub mod synthetic_scene;
