//! Shared functionality which is used in unit-tests.
//!
//! The core consumes host-built metadata, so the fixtures here are synthetic
//! modules shaped like the obfuscator's output: a `<Module>::.cctor` calling
//! the injected initializer, raw-data-backed payload fields, proxy delegate
//! types, and a resource bundle.

use std::cell::{Cell, RefCell};

use crate::{
    assembly::{Code, Instruction},
    deobfuscation::host::{HostServices, InvokeArg, InvokeValue},
    metadata::{
        identity::MemberId,
        method::{MethodDef, MethodFlags, MethodSig},
        module::{MemberRef, Module, ModuleResource},
        token::Token,
        types::{ElementType, FieldDef, TypeDef},
    },
    Result,
};

/// Token of the marker type's initializer in the fixtures.
pub const MARKER_INIT_TOKEN: u32 = 0x0600_0004;
/// Token of the string-decrypt method in the fixtures.
pub const STRING_DECRYPT_TOKEN: u32 = 0x0600_0005;
/// Token of the delegate-creator method in the proxy fixtures.
pub const PROXY_CREATOR_TOKEN: u32 = 0x0600_0007;
/// Token of the proxied call target in the proxy fixtures.
pub const PROXY_TARGET_TOKEN: u32 = 0x0600_0020;
/// Token of the proxy delegate's static field in the proxy fixtures.
pub const PROXY_FIELD_TOKEN: u32 = 0x0400_0010;
/// MemberRef token of the proxy delegate's `Invoke` in the proxy fixtures.
pub const PROXY_INVOKE_REF: u32 = 0x0A00_0002;

/// RVA of the executive payload in the fixtures.
pub const PAYLOAD_EXECUTIVE_RVA: u32 = 0x100;
/// RVA of the stub payload in the fixtures.
pub const PAYLOAD_STUB_RVA: u32 = 0x200;
/// XOR key stored in the stub payload of the fixtures.
pub const PAYLOAD_KEY: [u8; 4] = [0x5A, 0xC3, 0x7E, 0x11];

/// Name of the bundle manifest resource in the fixtures.
pub const BUNDLE_MANIFEST_RESOURCE: &str = "bundle.xml";
/// Name of the bundle blob resource in the fixtures.
pub const BUNDLE_BLOB_RESOURCE: &str = "bundle.bin";

/// Which marker-type shape a fixture module carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerFlavor {
    /// No obfuscator infrastructure at all.
    Clean,
    /// Initializer body references `"Full Trust Required"`.
    V3,
    /// Initializer body references `"E_FullTrust"`.
    V40,
    /// Like `V40` plus a `user32!CallWindowProcW` import.
    V41,
    /// No trust strings; nested types and the 5.0 field layout.
    V50,
    /// Both trust strings present - classification order decides.
    BothTrustStrings,
}

fn void_sig() -> MethodSig {
    MethodSig::new("System.Void", &[])
}

fn cctor(token: u32, instructions: Vec<Instruction>) -> MethodDef {
    MethodDef::new(
        Token(token),
        ".cctor",
        MethodFlags::STATIC | MethodFlags::RT_SPECIAL_NAME,
        void_sig(),
    )
    .with_body(instructions)
}

fn global_type(cctor_body: Vec<Instruction>) -> TypeDef {
    let mut ty = TypeDef::new(Token(0x0200_0001), "", "<Module>");
    ty.methods.push(cctor(0x0600_0001, cctor_body));
    ty
}

fn payload_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new(
            Token(0x0400_0001),
            "_executive",
            "System.Byte",
            ElementType::U1,
        )
        .with_rva(PAYLOAD_EXECUTIVE_RVA),
        FieldDef::new(Token(0x0400_0002), "_stub", "System.UInt32", ElementType::U4)
            .with_rva(PAYLOAD_STUB_RVA),
    ]
}

fn string_decrypt_method() -> MethodDef {
    MethodDef::new(
        Token(STRING_DECRYPT_TOKEN),
        "x",
        MethodFlags::STATIC,
        MethodSig::new("System.String", &["System.Int32"]),
    )
    .with_body(vec![
        Instruction::new(Code::Ldnull),
        Instruction::new(Code::Ret),
    ])
}

fn marker_type(flavor: MarkerFlavor) -> TypeDef {
    let mut ty = TypeDef::new(Token(0x0200_0002), "Zz", "A");

    let mut init_body = Vec::new();
    match flavor {
        MarkerFlavor::V3 => init_body.push(Instruction::ldstr("Full Trust Required")),
        MarkerFlavor::V40 | MarkerFlavor::V41 => {
            init_body.push(Instruction::ldstr("E_FullTrust"));
        }
        MarkerFlavor::BothTrustStrings => {
            init_body.push(Instruction::ldstr("E_FullTrust"));
            init_body.push(Instruction::ldstr("Full Trust Required"));
        }
        MarkerFlavor::V50 | MarkerFlavor::Clean => init_body.push(Instruction::new(Code::Nop)),
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
    ty.methods.push(string_decrypt_method());

    match flavor {
        MarkerFlavor::V50 => {
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
        }
        _ => ty.fields = payload_fields(),
    }

    if flavor == MarkerFlavor::V41 {
        ty.methods.push(
            MethodDef::new(Token(0x0600_0006), "w", MethodFlags::STATIC, void_sig())
                .with_pinvoke("user32.dll", "CallWindowProcW"),
        );
    }

    ty
}

/// Builds a synthetic module whose marker type matches `flavor`.
pub fn marker_module(flavor: MarkerFlavor) -> Module {
    let mut module = Module::new("app.exe");

    if flavor == MarkerFlavor::Clean {
        module.types.push(global_type(vec![
            Instruction::new(Code::Nop),
            Instruction::new(Code::Ret),
        ]));
        let mut program = TypeDef::new(Token(0x0200_0003), "App", "Program");
        program.methods.push(
            MethodDef::new(Token(0x0600_0003), "Main", MethodFlags::STATIC, void_sig())
                .with_body(vec![Instruction::new(Code::Ret)]),
        );
        module.types.push(program);
        return module;
    }

    module.types.push(global_type(vec![
        Instruction::new(Code::LdcI4_0),
        Instruction::new(Code::LdcI4_1),
        Instruction::call(Token(MARKER_INIT_TOKEN)),
        Instruction::new(Code::Ret),
    ]));
    module.types.push(marker_type(flavor));
    module
}

/// Builds a marker module extended with one proxy delegate.
pub fn proxy_module() -> Module {
    let mut module = marker_module(MarkerFlavor::V40);

    // Factory on the marker type: ldtoken + Delegate::CreateDelegate.
    let marker = module
        .types
        .iter_mut()
        .find(|t| t.name == "A")
        .expect("marker type");
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

    // The proxied target.
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

    // The proxy delegate type with its cctor wiring the target token.
    let mut proxy = TypeDef::new(Token(0x0200_0005), "", "P0")
        .with_base_type("System.MulticastDelegate");
    proxy.fields.push(FieldDef::new(
        Token(PROXY_FIELD_TOKEN),
        "d",
        "P0",
        ElementType::Class,
    ));
    proxy.methods.push(cctor(
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

    module
}

/// Builds a module carrying an assembly bundle in its resources.
pub fn bundle_module() -> Module {
    let mut module = Module::new("app.exe");

    let helper = b"MZhelper-bytes".to_vec();
    let runner = b"MZrunner-data!".to_vec();
    let mut blob = helper.clone();
    blob.extend_from_slice(&runner);

    let manifest = format!(
        r#"<assemblies data="{BUNDLE_BLOB_RESOURCE}">
    <assembly name="Helper" extension="dll" offset="0" length="{}"/>
    <assembly name="Runner" extension="exe" offset="{}" length="{}"/>
</assemblies>"#,
        helper.len(),
        helper.len(),
        runner.len(),
    );

    module
        .resources
        .push(ModuleResource::new(BUNDLE_MANIFEST_RESOURCE, manifest.into_bytes()));
    module
        .resources
        .push(ModuleResource::new(BUNDLE_BLOB_RESOURCE, blob));
    module
}

/// Builds a flat raw image carrying the executive and stub payloads.
///
/// Each entry is `(method token, body RVA, plaintext code)`; the code is
/// stored XOR-encrypted with [`PAYLOAD_KEY`] the way the decrypter expects
/// to find it.
pub fn encrypted_methods_image(methods: &[(u32, u32, &[u8])]) -> Vec<u8> {
    let mut image = vec![0u8; 0x1000];

    // Stub payload: key length + key bytes.
    let stub = PAYLOAD_STUB_RVA as usize;
    image[stub..stub + 4].copy_from_slice(&(PAYLOAD_KEY.len() as u32).to_le_bytes());
    image[stub + 4..stub + 4 + PAYLOAD_KEY.len()].copy_from_slice(&PAYLOAD_KEY);

    // Executive payload: magic, count, entries.
    let mut pos = PAYLOAD_EXECUTIVE_RVA as usize;
    let write_u32 = |image: &mut Vec<u8>, pos: &mut usize, value: u32| {
        image[*pos..*pos + 4].copy_from_slice(&value.to_le_bytes());
        *pos += 4;
    };
    write_u32(&mut image, &mut pos, crate::deobfuscation::methods::METHODS_MAGIC);
    write_u32(&mut image, &mut pos, methods.len() as u32);
    for (token, body_rva, code) in methods {
        write_u32(&mut image, &mut pos, *token);
        write_u32(&mut image, &mut pos, *body_rva);
        image[pos..pos + 2].copy_from_slice(&2u16.to_le_bytes()); // mh_flags: tiny
        pos += 2;
        image[pos..pos + 2].copy_from_slice(&8u16.to_le_bytes()); // max stack
        pos += 2;
        write_u32(&mut image, &mut pos, 0); // local var sig token
        write_u32(&mut image, &mut pos, code.len() as u32);
        for (index, byte) in code.iter().enumerate() {
            image[pos + index] = byte ^ PAYLOAD_KEY[index % PAYLOAD_KEY.len()];
        }
        pos += code.len();
    }

    image
}

/// Host stub recording every interaction.
///
/// `invoke` answers string decryption with `string#<id>`.
#[derive(Debug, Default)]
pub struct RecordingHost {
    invocations: Cell<usize>,
    decrypters_added: Cell<bool>,
    registered: RefCell<Vec<MemberId>>,
    files: RefCell<Vec<(String, String, Vec<u8>)>>,
}

impl RecordingHost {
    /// Creates a fresh recording host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `invoke` calls observed.
    pub fn invocations(&self) -> usize {
        self.invocations.get()
    }

    /// Whether `string_decrypters_added` was called.
    pub fn decrypters_added(&self) -> bool {
        self.decrypters_added.get()
    }

    /// Decrypt routines registered through `add_string_decrypter`.
    pub fn registered_decrypters(&self) -> Vec<MemberId> {
        self.registered.borrow().clone()
    }

    /// Files persisted through `create_assembly_file`.
    pub fn files(&self) -> Vec<(String, String, Vec<u8>)> {
        self.files.borrow().clone()
    }
}

impl HostServices for RecordingHost {
    fn invoke(&self, _method: &MemberId, args: &[InvokeArg]) -> Result<InvokeValue> {
        self.invocations.set(self.invocations.get() + 1);
        match args {
            [InvokeArg::Int32(id)] => Ok(InvokeValue::String(format!("string#{id}"))),
            _ => Err(crate::Error::Invoke("unexpected arguments".to_string())),
        }
    }

    fn create_assembly_file(
        &mut self,
        data: &[u8],
        simple_name: &str,
        extension: &str,
    ) -> Result<()> {
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
