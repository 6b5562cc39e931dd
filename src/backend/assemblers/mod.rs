pub mod spirv;
