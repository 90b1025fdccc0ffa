#![allow(dead_code)] // each suite uses its own subset of the builders

//! Synthetic-module builders shared by the integration suites.
//!
//! The core consumes host-built metadata, so each builder assembles a module
//! the way the obfuscator's output looks: `<Module>::.cctor` calling the
//! injected initializer, raw-data payload fields, a proxy delegate, an
//! assembly bundle.

use std::cell::{Cell, RefCell};

use veilstrip::{
    assembly::{Code, Instruction},
    deobfuscation::{methods::METHODS_MAGIC, HostServices, InvokeArg, InvokeValue},
    metadata::{
        ElementType, FieldDef, MemberId, MemberRef, MethodDef, MethodFlags, MethodSig, Module,
        ModuleResource, Token, TypeDef,
    },
};

pub const MARKER_INIT_TOKEN: u32 = 0x0600_0004;
pub const STRING_DECRYPT_TOKEN: u32 = 0x0600_0005;
pub const PROXY_CREATOR_TOKEN: u32 = 0x0600_0007;
pub const PROXY_TARGET_TOKEN: u32 = 0x0600_0020;
pub const PROXY_FIELD_TOKEN: u32 = 0x0400_0010;
pub const PROXY_INVOKE_REF: u32 = 0x0A00_0002;

pub const PAYLOAD_EXECUTIVE_RVA: u32 = 0x100;
pub const PAYLOAD_STUB_RVA: u32 = 0x200;
pub const PAYLOAD_KEY: [u8; 4] = [0x5A, 0xC3, 0x7E, 0x11];

pub const BUNDLE_MANIFEST_RESOURCE: &str = "bundle.xml";
pub const BUNDLE_BLOB_RESOURCE: &str = "bundle.bin";

/// Which pieces of obfuscator infrastructure a built module carries.
#[derive(Debug, Clone, Copy)]
pub struct Shape {
    /// Marker type present, `.cctor` calls the initializer.
    pub marker: bool,
    /// Initializer body references `"E_FullTrust"`.
    pub e_full_trust: bool,
    /// Initializer body references `"Full Trust Required"`.
    pub full_trust_required: bool,
    /// Marker type imports `user32!CallWindowProcW`.
    pub pinvoke: bool,
    /// Marker type has nested types and the 5.0 field layout.
    pub v5_fields: bool,
    /// Marker type carries the two raw-data payload fields.
    pub payload_fields: bool,
    /// Marker type declares the string-decrypt routine.
    pub string_method: bool,
    /// Proxy delegate creator and one proxy delegate type present.
    pub proxy: bool,
    /// The `____KILL` anti-tamper marker type present.
    pub kill_type: bool,
}

impl Shape {
    pub fn clean() -> Self {
        Self {
            marker: false,
            e_full_trust: false,
            full_trust_required: false,
            pinvoke: false,
            v5_fields: false,
            payload_fields: false,
            string_method: false,
            proxy: false,
            kill_type: false,
        }
    }

    /// A fully protected 4.0 module: every scored aspect present.
    pub fn full_v40() -> Self {
        Self {
            marker: true,
            e_full_trust: true,
            full_trust_required: false,
            pinvoke: false,
            v5_fields: false,
            payload_fields: true,
            string_method: true,
            proxy: true,
            kill_type: false,
        }
    }
}

fn void_sig() -> MethodSig {
    MethodSig::new("System.Void", &[])
}

fn cctor_method(token: u32, instructions: Vec<Instruction>) -> MethodDef {
    MethodDef::new(
        Token(token),
        ".cctor",
        MethodFlags::STATIC | MethodFlags::RT_SPECIAL_NAME,
        void_sig(),
    )
    .with_body(instructions)
}

pub fn build_module(shape: Shape) -> Module {
    let mut module = Module::new("app.exe");

    let cctor_body = if shape.marker {
        vec![
            Instruction::new(Code::LdcI4_0),
            Instruction::new(Code::LdcI4_1),
            Instruction::call(Token(MARKER_INIT_TOKEN)),
            Instruction::new(Code::Ret),
        ]
    } else {
        vec![Instruction::new(Code::Nop), Instruction::new(Code::Ret)]
    };
    let mut global = TypeDef::new(Token(0x0200_0001), "", "<Module>");
    global.methods.push(cctor_method(0x0600_0001, cctor_body));
    module.types.push(global);

    if shape.marker {
        module.types.push(marker_type(shape));
    }

    let mut program = TypeDef::new(Token(0x0200_0006), "App", "Program");
    program.methods.push(
        MethodDef::new(
            Token(PROXY_TARGET_TOKEN),
            "Run",
            MethodFlags::STATIC,
            MethodSig::new("System.Void", &["System.Int32"]),
        )
        .with_body(vec![Instruction::new(Code::Ret)]),
    );
    module.types.push(program);

    if shape.proxy {
        add_proxy(&mut module);
    }
    if shape.kill_type {
        module
            .types
            .push(TypeDef::new(Token(0x0200_0009), "", "____KILL"));
    }

    module
}

fn marker_type(shape: Shape) -> TypeDef {
    let mut ty = TypeDef::new(Token(0x0200_0002), "Zz", "A");

    let mut init_body = Vec::new();
    if shape.e_full_trust {
        init_body.push(Instruction::ldstr("E_FullTrust"));
    }
    if shape.full_trust_required {
        init_body.push(Instruction::ldstr("Full Trust Required"));
    }
    if init_body.is_empty() {
        init_body.push(Instruction::new(Code::Nop));
    }
    init_body.push(Instruction::new(Code::Ret));

    ty.methods.push(
        MethodDef::new(
            Token(MARKER_INIT_TOKEN),
            "q",
            MethodFlags::STATIC,
            MethodSig::new("System.Void", &["System.Boolean", "System.Boolean"]),
        )
        .with_body(init_body),
    );

    if shape.string_method {
        ty.methods.push(
            MethodDef::new(
                Token(STRING_DECRYPT_TOKEN),
                "x",
                MethodFlags::STATIC,
                MethodSig::new("System.String", &["System.Int32"]),
            )
            .with_body(vec![
                Instruction::new(Code::Ldnull),
                Instruction::new(Code::Ret),
            ]),
        );
    }

    if shape.pinvoke {
        ty.methods.push(
            MethodDef::new(Token(0x0600_0006), "w", MethodFlags::STATIC, void_sig())
                .with_pinvoke("user32.dll", "CallWindowProcW"),
        );
    }

    if shape.v5_fields {
        ty.fields = vec![
            FieldDef::new(
                Token(0x0400_0005),
                "b",
                "System.Byte[]",
                ElementType::SzArray,
            ),
            FieldDef::new(
                Token(0x0400_0006),
                "l",
                "System.Collections.Generic.List`1<System.Delegate>",
                ElementType::GenericInst,
            ),
            FieldDef::new(
                Token(0x0400_0007),
                "h",
                "System.Runtime.InteropServices.GCHandle",
                ElementType::ValueType,
            ),
        ];
        ty.nested_types
            .push(TypeDef::new(Token(0x0200_0004), "", "N"));
    } else if shape.payload_fields {
        ty.fields = vec![
            FieldDef::new(
                Token(0x0400_0001),
                "_executive",
                "System.Byte",
                ElementType::U1,
            )
            .with_rva(PAYLOAD_EXECUTIVE_RVA),
            FieldDef::new(Token(0x0400_0002), "_stub", "System.UInt32", ElementType::U4)
                .with_rva(PAYLOAD_STUB_RVA),
        ];
    }

    ty
}

fn add_proxy(module: &mut Module) {
    let marker = module
        .types
        .iter_mut()
        .find(|t| t.name == "A")
        .expect("proxy shapes require the marker type");
    marker.methods.push(
        MethodDef::new(
            Token(PROXY_CREATOR_TOKEN),
            "c",
            MethodFlags::STATIC,
            MethodSig::new("System.Void", &["System.Int32"]),
        )
        .with_body(vec![
            Instruction::with_token(Code::Ldtoken, Token(PROXY_TARGET_TOKEN)),
            Instruction::call(Token(0x0A00_0001)),
            Instruction::new(Code::Ret),
        ]),
    );

    let mut proxy =
        TypeDef::new(Token(0x0200_0005), "", "P0").with_base_type("System.MulticastDelegate");
    proxy.fields.push(FieldDef::new(
        Token(PROXY_FIELD_TOKEN),
        "d",
        "P0",
        ElementType::Class,
    ));
    proxy.methods.push(cctor_method(
        0x0600_0010,
        vec![
            Instruction::ldc_i4(PROXY_TARGET_TOKEN as i32),
            Instruction::call(Token(PROXY_CREATOR_TOKEN)),
            Instruction::new(Code::Ret),
        ],
    ));
    module.types.push(proxy);

    module.member_refs.push(MemberRef::new(
        Token(0x0A00_0001),
        "System.Delegate",
        "CreateDelegate",
        MethodSig::new(
            "System.Delegate",
            &["System.Type", "System.Reflection.MethodInfo"],
        ),
    ));
    module.member_refs.push(MemberRef::new(
        Token(PROXY_INVOKE_REF),
        "P0",
        "Invoke",
        MethodSig::new("System.Void", &["System.Int32"]),
    ));
}

/// Adds a two-assembly bundle to the module's resources and returns the
/// embedded raw images.
pub fn add_bundle(module: &mut Module) -> Vec<(String, String, Vec<u8>)> {
    let entries = vec![
        ("Helper".to_string(), "dll".to_string(), b"MZhelper-bytes".to_vec()),
        ("Runner".to_string(), "exe".to_string(), b"MZrunner-data!".to_vec()),
    ];

    let mut blob = Vec::new();
    let mut manifest = format!(r#"<assemblies data="{BUNDLE_BLOB_RESOURCE}">"#);
    for (name, extension, data) in &entries {
        manifest.push_str(&format!(
            r#"<assembly name="{name}" extension="{extension}" offset="{}" length="{}"/>"#,
            blob.len(),
            data.len(),
        ));
        blob.extend_from_slice(data);
    }
    manifest.push_str("</assemblies>");

    module.resources.push(ModuleResource::new(
        BUNDLE_MANIFEST_RESOURCE,
        manifest.into_bytes(),
    ));
    module
        .resources
        .push(ModuleResource::new(BUNDLE_BLOB_RESOURCE, blob));

    entries
}

/// Re-embeds extracted assemblies into a fresh bundle, mirroring
/// [`add_bundle`].
pub fn rebuild_bundle(files: &[(String, String, Vec<u8>)]) -> (Vec<u8>, Vec<u8>) {
    let mut blob = Vec::new();
    let mut manifest = format!(r#"<assemblies data="{BUNDLE_BLOB_RESOURCE}">"#);
    for (name, extension, data) in files {
        manifest.push_str(&format!(
            r#"<assembly name="{name}" extension="{extension}" offset="{}" length="{}"/>"#,
            blob.len(),
            data.len(),
        ));
        blob.extend_from_slice(data);
    }
    manifest.push_str("</assemblies>");
    (manifest.into_bytes(), blob)
}

/// Builds a flat raw image carrying the executive and stub payloads.
pub fn encrypted_methods_image(methods: &[(u32, u32, &[u8])]) -> Vec<u8> {
    let mut image = vec![0u8; 0x1000];

    let stub = PAYLOAD_STUB_RVA as usize;
    image[stub..stub + 4].copy_from_slice(&(PAYLOAD_KEY.len() as u32).to_le_bytes());
    image[stub + 4..stub + 4 + PAYLOAD_KEY.len()].copy_from_slice(&PAYLOAD_KEY);

    let mut pos = PAYLOAD_EXECUTIVE_RVA as usize;
    let write_u32 = |image: &mut Vec<u8>, pos: &mut usize, value: u32| {
        image[*pos..*pos + 4].copy_from_slice(&value.to_le_bytes());
        *pos += 4;
    };
    write_u32(&mut image, &mut pos, METHODS_MAGIC);
    write_u32(&mut image, &mut pos, methods.len() as u32);
    for (token, body_rva, code) in methods {
        write_u32(&mut image, &mut pos, *token);
        write_u32(&mut image, &mut pos, *body_rva);
        image[pos..pos + 2].copy_from_slice(&2u16.to_le_bytes());
        pos += 2;
        image[pos..pos + 2].copy_from_slice(&8u16.to_le_bytes());
        pos += 2;
        write_u32(&mut image, &mut pos, 0);
        write_u32(&mut image, &mut pos, code.len() as u32);
        for (index, byte) in code.iter().enumerate() {
            image[pos + index] = byte ^ PAYLOAD_KEY[index % PAYLOAD_KEY.len()];
        }
        pos += code.len();
    }

    image
}

/// Host stub recording every interaction; `invoke` answers string
/// decryption with `string#<id>`.
#[derive(Debug, Default)]
pub struct RecordingHost {
    invocations: Cell<usize>,
    decrypters_added: Cell<bool>,
    registered: RefCell<Vec<MemberId>>,
    files: RefCell<Vec<(String, String, Vec<u8>)>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> usize {
        self.invocations.get()
    }

    pub fn decrypters_added(&self) -> bool {
        self.decrypters_added.get()
    }

    pub fn registered_decrypters(&self) -> Vec<MemberId> {
        self.registered.borrow().clone()
    }

    pub fn files(&self) -> Vec<(String, String, Vec<u8>)> {
        self.files.borrow().clone()
    }
}

impl HostServices for RecordingHost {
    fn invoke(
        &self,
        _method: &MemberId,
        args: &[InvokeArg],
    ) -> veilstrip::Result<InvokeValue> {
        self.invocations.set(self.invocations.get() + 1);
        match args {
            [InvokeArg::Int32(id)] => Ok(InvokeValue::String(format!("string#{id}"))),
            _ => Err(veilstrip::Error::Invoke("unexpected arguments".to_string())),
        }
    }

    fn create_assembly_file(
        &mut self,
        data: &[u8],
        simple_name: &str,
        extension: &str,
    ) -> veilstrip::Result<()> {
        self.files.borrow_mut().push((
            simple_name.to_string(),
            extension.to_string(),
            data.to_vec(),
        ));
        Ok(())
    }

    fn add_string_decrypter(&mut self, method: &MemberId) {
        self.registered.borrow_mut().push(method.clone());
    }

    fn string_decrypters_added(&mut self) {
        self.decrypters_added.set(true);
    }
}
