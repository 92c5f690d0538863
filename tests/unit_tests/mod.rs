mod evaluate;
mod field;
mod layout;
mod pencil;
mod settings;
mod symbolic;
