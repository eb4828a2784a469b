//! C declaration model and final text assembly
//!
//! Analysis produces declarations into five streams; `render` concatenates
//! them in the fixed order: includes, structs, enums, globals, functions.
//! Struct order is first-materialization order, which is why synthesized
//! structs (generic instances, closure environments) are appended the
//! moment they come into existence.

use std::fmt::{self, Write};

/// One entry in the struct stream
#[derive(Debug, Clone, PartialEq)]
pub enum StructEntry {
    /// Plain struct; fields are pre-rendered declarators (`int x`)
    Struct { name: String, fields: Vec<String> },
    /// Tagged-union wrapper: tag enum plus the tag+union struct.
    /// The variant structs themselves are pushed as `Struct` entries
    /// immediately before this one.
    Union { name: String, variants: Vec<String> },
}

/// A complete C function
#[derive(Debug, Clone, PartialEq)]
pub struct CFunction {
    pub ret: String,
    pub name: String,
    /// Pre-rendered parameter declarators (`int x`, `struct outer_t this`)
    pub params: Vec<String>,
    /// Fully indented body lines, without trailing newlines
    pub body: Vec<String>,
}

/// Collected output of one compilation
#[derive(Debug, Default)]
pub struct CProgram {
    includes: Vec<String>,
    structs: Vec<StructEntry>,
    enums: Vec<(String, Vec<String>)>,
    globals: Vec<String>,
    functions: Vec<CFunction>,
}

impl CProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_include(&mut self, header: &str) {
        self.includes.push(header.to_string());
    }

    /// Append a struct entry, returning its index so a placeholder pushed
    /// early (closure environments) can be filled in later.
    pub fn push_struct(&mut self, name: &str, fields: Vec<String>) -> usize {
        self.structs.push(StructEntry::Struct {
            name: name.to_string(),
            fields,
        });
        self.structs.len() - 1
    }

    pub fn set_struct_fields(&mut self, index: usize, fields: Vec<String>) {
        if let Some(StructEntry::Struct { fields: slot, .. }) = self.structs.get_mut(index) {
            *slot = fields;
        }
    }

    pub fn push_union(&mut self, name: &str, variants: Vec<String>) {
        self.structs.push(StructEntry::Union {
            name: name.to_string(),
            variants,
        });
    }

    pub fn push_enum(&mut self, name: &str, variants: Vec<String>) {
        self.enums.push((name.to_string(), variants));
    }

    pub fn push_global(&mut self, line: String) {
        self.globals.push(line);
    }

    pub fn push_function(&mut self, function: CFunction) {
        self.functions.push(function);
    }

    /// Assemble the final text
    pub fn render(&self) -> Result<String, fmt::Error> {
        let mut output = String::new();

        for header in &self.includes {
            writeln!(output, "#include <{header}.h>")?;
        }

        for entry in &self.structs {
            match entry {
                StructEntry::Struct { name, fields } => {
                    writeln!(output, "struct {name} {{")?;
                    for field in fields {
                        writeln!(output, "    {field};")?;
                    }
                    writeln!(output, "}};")?;
                }
                StructEntry::Union { name, variants } => {
                    writeln!(output, "enum {name}Tag {{ {} }};", variants.join(", "))?;
                    writeln!(output, "struct {name} {{")?;
                    writeln!(output, "    enum {name}Tag tag;")?;
                    writeln!(output, "    union {{")?;
                    for variant in variants {
                        writeln!(output, "        struct {variant} {variant};")?;
                    }
                    writeln!(output, "    }};")?;
                    writeln!(output, "}};")?;
                }
            }
        }

        for (name, variants) in &self.enums {
            writeln!(output, "enum {name} {{ {} }};", variants.join(", "))?;
        }

        for global in &self.globals {
            writeln!(output, "{global}")?;
        }

        for function in &self.functions {
            writeln!(
                output,
                "{} {}({}) {{",
                function.ret,
                function.name,
                function.params.join(", ")
            )?;
            for line in &function.body {
                writeln!(output, "{line}")?;
            }
            writeln!(output, "}}")?;
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_empty_struct() {
        let mut program = CProgram::new();
        program.push_struct("Empty", vec![]);
        assert_eq!(program.render().unwrap(), "struct Empty {\n};\n");
    }

    #[test]
    fn test_render_struct_with_fields() {
        let mut program = CProgram::new();
        program.push_struct("Point", vec!["int x".to_string(), "int y".to_string()]);
        assert_eq!(
            program.render().unwrap(),
            "struct Point {\n    int x;\n    int y;\n};\n"
        );
    }

    #[test]
    fn test_render_enum_single_line() {
        let mut program = CProgram::new();
        program.push_enum("MyEnum", vec!["First".to_string(), "Second".to_string()]);
        assert_eq!(program.render().unwrap(), "enum MyEnum { First, Second };\n");
    }

    #[test]
    fn test_render_function_empty_body() {
        let mut program = CProgram::new();
        program.push_function(CFunction {
            ret: "void".to_string(),
            name: "foo".to_string(),
            params: vec![],
            body: vec![],
        });
        assert_eq!(program.render().unwrap(), "void foo() {\n}\n");
    }

    #[test]
    fn test_render_union_after_variant_structs() {
        let mut program = CProgram::new();
        program.push_struct("Circle", vec!["unsigned int radius".to_string()]);
        program.push_struct("Square", vec!["unsigned int side".to_string()]);
        program.push_union("Shape", vec!["Circle".to_string(), "Square".to_string()]);
        let text = program.render().unwrap();
        assert!(text.contains("enum ShapeTag { Circle, Square };\n"));
        assert!(text.contains(
            "struct Shape {\n    enum ShapeTag tag;\n    union {\n        struct Circle Circle;\n        struct Square Square;\n    };\n};\n"
        ));
        // variants precede the wrapper
        let circle = text.find("struct Circle {").unwrap();
        let wrapper = text.find("struct Shape {").unwrap();
        assert!(circle < wrapper);
    }

    #[test]
    fn test_render_section_order() {
        let mut program = CProgram::new();
        program.push_function(CFunction {
            ret: "void".to_string(),
            name: "f".to_string(),
            params: vec![],
            body: vec![],
        });
        program.push_global("int x = 1;".to_string());
        program.push_enum("E", vec!["A".to_string()]);
        program.push_struct("S", vec![]);
        program.push_include("stdio");
        let text = program.render().unwrap();
        let include = text.find("#include").unwrap();
        let st = text.find("struct S").unwrap();
        let en = text.find("enum E").unwrap();
        let global = text.find("int x = 1;").unwrap();
        let func = text.find("void f()").unwrap();
        assert!(include < st && st < en && en < global && global < func);
    }

    #[test]
    fn test_placeholder_struct_fields_filled_later() {
        let mut program = CProgram::new();
        let index = program.push_struct("outer_t", vec![]);
        program.push_struct("Later", vec![]);
        program.set_struct_fields(index, vec!["int myValue".to_string()]);
        let text = program.render().unwrap();
        assert!(text.starts_with("struct outer_t {\n    int myValue;\n};\n"));
    }
}
